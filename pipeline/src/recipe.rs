//! Zero-configuration build recipe detection (§4.5 step 2). Deterministic
//! given the set of files present at the repository root: a `Dockerfile`
//! always wins, otherwise the first matching language marker decides.

use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipe {
    Dockerfile,
    Node,
    Go,
    Python,
    Php,
    Ruby,
    Static,
}

impl Recipe {
    /// The synthesized Dockerfile used when the repo has none of its own.
    /// `Recipe::Dockerfile` has no synthesized content — the adapter reads
    /// the repository's own file.
    pub fn synthesize_dockerfile(&self) -> Option<&'static str> {
        match self {
            Recipe::Dockerfile => None,
            Recipe::Node => Some(
                "FROM node:20-slim\nWORKDIR /app\nCOPY . .\nRUN npm ci --omit=dev\nCMD [\"npm\", \"start\"]\n",
            ),
            Recipe::Go => Some(
                "FROM golang:1.22 AS build\nWORKDIR /src\nCOPY . .\nRUN go build -o /app\nFROM gcr.io/distroless/base\nCOPY --from=build /app /app\nCMD [\"/app\"]\n",
            ),
            Recipe::Python => Some(
                "FROM python:3.12-slim\nWORKDIR /app\nCOPY . .\nRUN pip install --no-cache-dir -r requirements.txt\nCMD [\"python\", \"app.py\"]\n",
            ),
            Recipe::Php => Some(
                "FROM php:8.3-apache\nCOPY . /var/www/html\nRUN docker-php-ext-install pdo pdo_mysql\n",
            ),
            Recipe::Ruby => Some(
                "FROM ruby:3.3-slim\nWORKDIR /app\nCOPY . .\nRUN bundle install\nCMD [\"bundle\", \"exec\", \"rackup\", \"-o\", \"0.0.0.0\"]\n",
            ),
            Recipe::Static => Some(
                "FROM nginx:alpine\nCOPY . /usr/share/nginx/html\n",
            ),
        }
    }
}

/// Inspects a cloned repository's top-level file listing and picks a
/// recipe. Separated from its caller so the decision logic is testable
/// without touching a real filesystem.
pub fn choose_recipe(markers: &HashSet<String>) -> Recipe {
    if markers.contains("Dockerfile") {
        Recipe::Dockerfile
    } else if markers.contains("package.json") {
        Recipe::Node
    } else if markers.contains("go.mod") {
        Recipe::Go
    } else if markers.contains("requirements.txt") || markers.contains("pyproject.toml") {
        Recipe::Python
    } else if markers.contains("composer.json") {
        Recipe::Php
    } else if markers.contains("Gemfile") {
        Recipe::Ruby
    } else {
        Recipe::Static
    }
}

pub fn detect_recipe(dir: &Path) -> Recipe {
    let markers: HashSet<String> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    choose_recipe(&markers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn dockerfile_always_wins() {
        assert_eq!(
            choose_recipe(&markers(&["Dockerfile", "package.json"])),
            Recipe::Dockerfile
        );
    }

    #[test]
    fn falls_back_to_static_with_no_markers() {
        assert_eq!(choose_recipe(&markers(&["index.html"])), Recipe::Static);
    }

    #[test]
    fn picks_node_from_package_json() {
        assert_eq!(choose_recipe(&markers(&["package.json", "src"])), Recipe::Node);
    }

    #[test]
    fn picks_php_from_composer_json() {
        assert_eq!(choose_recipe(&markers(&["composer.json", "index.php"])), Recipe::Php);
    }

    #[test]
    fn picks_ruby_from_gemfile() {
        assert_eq!(choose_recipe(&markers(&["Gemfile", "Gemfile.lock"])), Recipe::Ruby);
    }
}
