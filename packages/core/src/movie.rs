//! Movie and recommendation types returned by the guarded dependencies.

use serde::{Deserialize, Serialize};

/// A movie as returned by the movie-data API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movie {
    pub title: String,
    pub year: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub genre: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub director: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub actors: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plot: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub poster: String,
    pub imdb_id: String,
}

/// What the user has seen and what they like.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationRequest {
    #[serde(default)]
    pub watched_movies: Vec<String>,
    #[serde(default)]
    pub interests: Vec<String>,
}

impl RecommendationRequest {
    pub fn new(watched_movies: Vec<String>, interests: Vec<String>) -> Self {
        Self {
            watched_movies,
            interests,
        }
    }
}

/// Titles suggested by the recommendation model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationResult {
    pub recommended_movies: Vec<String>,
}

impl RecommendationResult {
    /// The fallback a caller returns when the model is unavailable.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a comma-separated model answer into trimmed, non-empty titles.
    pub fn from_completion(text: &str) -> Self {
        let recommended_movies = text
            .split(',')
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_string)
            .collect();
        Self { recommended_movies }
    }
}
