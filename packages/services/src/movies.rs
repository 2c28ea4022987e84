//! Movie lookup against the OMDb search API.

use std::time::Duration;

use flick_core::Movie;
use resilience::{Classify, FailureKind, MovieLookup, PolicyError, ResiliencePolicy, classify_status};
use serde::Deserialize;
use thiserror::Error;

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// OMDb client settings.
#[derive(Debug, Clone)]
pub struct OmdbConfig {
    pub base_url: String,
    pub api_key: String,
    /// Search term used for the "popular" list.
    pub search_term: String,
    pub timeout: Duration,
}

impl Default for OmdbConfig {
    fn default() -> Self {
        Self {
            base_url: "http://www.omdbapi.com/".to_string(),
            api_key: String::new(),
            search_term: "action".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl OmdbConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_search_term(mut self, term: impl Into<String>) -> Self {
        self.search_term = term.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A failed movie lookup.
#[derive(Debug, Error)]
pub enum MovieLookupError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("movie API returned {status}")]
    Status { status: u16 },

    #[error("invalid movie API response: {0}")]
    Decode(#[source] reqwest::Error),
}

impl Classify for MovieLookupError {
    fn classify(&self) -> FailureKind {
        match self {
            MovieLookupError::Request(e) if e.is_builder() => FailureKind::Permanent,
            MovieLookupError::Request(_) => FailureKind::Transient,
            MovieLookupError::Status { status } => classify_status(*status),
            MovieLookupError::Decode(_) => FailureKind::Permanent,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OmdbSearchResponse {
    #[serde(rename = "Search")]
    search: Option<Vec<OmdbMovie>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OmdbMovie {
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "Year")]
    year: String,
    #[serde(rename = "Genre")]
    genre: String,
    #[serde(rename = "Director")]
    director: String,
    #[serde(rename = "Actors")]
    actors: String,
    #[serde(rename = "Plot")]
    plot: String,
    #[serde(rename = "Poster")]
    poster: String,
    #[serde(rename = "imdbID")]
    imdb_id: String,
}

impl From<OmdbMovie> for Movie {
    fn from(m: OmdbMovie) -> Self {
        Movie {
            title: m.title,
            year: m.year,
            genre: m.genre,
            director: m.director,
            actors: m.actors,
            plot: m.plot,
            poster: m.poster,
            imdb_id: m.imdb_id,
        }
    }
}

/// Fetches movies from OMDb through its own [`ResiliencePolicy`].
#[derive(Clone)]
pub struct MovieClient {
    http: reqwest::Client,
    config: OmdbConfig,
    policy: ResiliencePolicy<MovieLookup>,
}

impl MovieClient {
    pub fn new(
        config: OmdbConfig,
        policy: ResiliencePolicy<MovieLookup>,
    ) -> Result<Self, MovieLookupError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(MovieLookupError::Request)?;
        Ok(Self {
            http,
            config,
            policy,
        })
    }

    pub fn policy(&self) -> &ResiliencePolicy<MovieLookup> {
        &self.policy
    }

    /// Search results for the configured term.
    ///
    /// A response without a `Search` array (OMDb's "no results") is an
    /// empty list, not an error.
    pub async fn popular_movies(&self) -> Result<Vec<Movie>, PolicyError<MovieLookupError>> {
        self.policy.execute(|| self.fetch_once()).await
    }

    /// Like [`popular_movies`](Self::popular_movies), but any failure is
    /// logged and turned into an empty list.
    pub async fn popular_movies_or_empty(&self) -> Vec<Movie> {
        match self.popular_movies().await {
            Ok(movies) => movies,
            Err(e) => {
                tracing::warn!(policy = e.policy(), error = %e, "Movie lookup failed, returning no movies");
                Vec::new()
            }
        }
    }

    async fn fetch_once(&self) -> Result<Vec<Movie>, MovieLookupError> {
        let response = self
            .http
            .get(&self.config.base_url)
            .query(&[
                ("s", self.config.search_term.as_str()),
                ("type", "movie"),
                ("apikey", self.config.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(MovieLookupError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(MovieLookupError::Status {
                status: status.as_u16(),
            });
        }

        let body: OmdbSearchResponse = response.json().await.map_err(MovieLookupError::Decode)?;
        let movies: Vec<Movie> = body
            .search
            .unwrap_or_default()
            .into_iter()
            .map(Movie::from)
            .collect();

        tracing::debug!(count = movies.len(), "Fetched movies");
        Ok(movies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_follow_http_class() {
        assert!(MovieLookupError::Status { status: 503 }.is_transient());
        assert!(MovieLookupError::Status { status: 429 }.is_transient());
        assert!(!MovieLookupError::Status { status: 401 }.is_transient());
        assert!(!MovieLookupError::Status { status: 404 }.is_transient());
    }

    #[test]
    fn omdb_search_maps_to_movies() {
        let body = r#"{
            "Search": [
                {"Title": "Heat", "Year": "1995", "imdbID": "tt0113277", "Type": "movie", "Poster": "N/A"}
            ],
            "totalResults": "1",
            "Response": "True"
        }"#;
        let parsed: OmdbSearchResponse = serde_json::from_str(body).unwrap();
        let movies: Vec<Movie> = parsed
            .search
            .unwrap_or_default()
            .into_iter()
            .map(Movie::from)
            .collect();

        assert_eq!(movies.len(), 1);
        assert_eq!(movies[0].title, "Heat");
        assert_eq!(movies[0].imdb_id, "tt0113277");
        assert!(movies[0].genre.is_empty());
    }

    #[test]
    fn missing_search_is_no_results() {
        let parsed: OmdbSearchResponse =
            serde_json::from_str(r#"{"Response":"False","Error":"Movie not found!"}"#).unwrap();
        assert!(parsed.search.is_none());
    }
}
