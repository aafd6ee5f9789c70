//! Fakes shared by the unit tests

use crate::Result;
use crate::error::SkycastError;
use crate::http::{HttpResponse, NetworkClient};
use crate::retry::Sleeper;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Records requested suspensions instead of sleeping
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

/// What a scripted route answers with
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(u16, String),
    Fail(String),
}

struct Route {
    url_prefix: String,
    replies: VecDeque<Scripted>,
    /// Replayed once `replies` runs dry
    fallback: Option<Scripted>,
}

/// A `NetworkClient` that answers from per-URL scripts and logs every call
#[derive(Default)]
pub struct ScriptedNetwork {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl ScriptedNetwork {
    /// Answers every request under `url_prefix` with `reply`.
    pub fn always(self, url_prefix: &str, reply: Scripted) -> Self {
        self.script(url_prefix, Vec::new(), Some(reply))
    }

    /// Answers requests under `url_prefix` with `replies` in order, then fails.
    pub fn sequence(self, url_prefix: &str, replies: Vec<Scripted>) -> Self {
        self.script(url_prefix, replies, None)
    }

    fn script(self, url_prefix: &str, replies: Vec<Scripted>, fallback: Option<Scripted>) -> Self {
        self.routes.lock().unwrap().push(Route {
            url_prefix: url_prefix.to_string(),
            replies: replies.into(),
            fallback,
        });
        self
    }

    /// Number of calls whose URL starts with `url_prefix`
    pub fn calls_to(&self, url_prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.starts_with(url_prefix))
            .count()
    }

    /// Query parameters of every call under `url_prefix`
    pub fn queries_to(&self, url_prefix: &str) -> Vec<Vec<(String, String)>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.starts_with(url_prefix))
            .map(|(_, query)| query.clone())
            .collect()
    }
}

#[async_trait]
impl NetworkClient for ScriptedNetwork {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), query.to_vec()));

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            routes
                .iter_mut()
                .find(|route| url.starts_with(&route.url_prefix))
                .and_then(|route| route.replies.pop_front().or_else(|| route.fallback.clone()))
        };

        match reply {
            Some(Scripted::Respond(status, body)) => Ok(HttpResponse { status, body }),
            Some(Scripted::Fail(message)) => Err(SkycastError::transient(message)),
            None => Err(SkycastError::transient(format!("no script for {url}"))),
        }
    }
}

pub const GEOCODE_URL: &str = "http://geocode.test/json";
pub const FORECAST_URL: &str = "http://forecast.test/data/2.5";

pub fn geocode_body(lat: f64, lng: f64, zip: Option<&str>, country: Option<&str>) -> String {
    let mut components = Vec::new();
    if let Some(zip) = zip {
        components.push(serde_json::json!({
            "long_name": zip, "short_name": zip, "types": ["postal_code"]
        }));
    }
    if let Some(country) = country {
        components.push(serde_json::json!({
            "long_name": "Country", "short_name": country, "types": ["country", "political"]
        }));
    }
    serde_json::json!({
        "status": "OK",
        "results": [{
            "address_components": components,
            "geometry": { "location": { "lat": lat, "lng": lng } }
        }]
    })
    .to_string()
}

pub fn zero_results_body() -> String {
    serde_json::json!({ "status": "ZERO_RESULTS", "results": [] }).to_string()
}

pub fn forecast_body() -> String {
    serde_json::json!({
        "cod": "200",
        "list": [
            {
                "dt": 1_700_000_000,
                "main": { "temp": 71.2, "temp_min": 68.0, "temp_max": 73.4 },
                "weather": [{ "description": "clear sky", "icon": "01d" }]
            },
            {
                "dt": 1_700_010_800,
                "main": { "temp": 66.0, "temp_min": 64.1, "temp_max": 67.0 },
                "weather": [{ "description": "few clouds", "icon": "02n" }]
            }
        ]
    })
    .to_string()
}
