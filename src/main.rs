use anyhow::{Context, Result, bail};
use skycast::credentials::EnvCredentials;
use skycast::http::ReqwestClient;
use skycast::{
    CacheStore, FetchOptions, SkycastConfig, WeatherOrchestrator, WeatherReport, logging,
};
use std::fmt::Write;
use std::process::ExitCode;
use std::sync::Arc;

const USAGE: &str = "usage: skycast [--fresh] [--text] <postal code or address>";

#[derive(Debug, PartialEq)]
struct Args {
    query: String,
    /// Bypass both cache tiers
    fresh: bool,
    /// Print a readable table instead of JSON
    text: bool,
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Args> {
    let mut fresh = false;
    let mut text = false;
    let mut words = Vec::new();
    for arg in args {
        match arg.as_str() {
            "--fresh" => fresh = true,
            "--text" => text = true,
            "-h" | "--help" => bail!(USAGE),
            _ => words.push(arg),
        }
    }
    if words.is_empty() {
        bail!(USAGE);
    }
    Ok(Args {
        query: words.join(" "),
        fresh,
        text,
    })
}

/// One line per forecast point, under a header naming the place
fn render_text(report: &WeatherReport) -> String {
    let place = match (&report.postal_code, &report.country_code) {
        (Some(postal), Some(country)) => format!("{postal}, {country}"),
        (Some(postal), None) => postal.clone(),
        (None, Some(country)) => country.clone(),
        (None, None) => "unknown location".to_string(),
    };
    let source = if report.is_from_cache { "cached" } else { "live" };

    let mut out = format!("Forecast for {place} ({source})\n");
    for point in &report.forecast {
        let _ = write!(
            out,
            "{}  {}",
            point.timestamp.format("%a %d %b %H:%M"),
            point.format_temperature(report.units)
        );
        if let Some(range) = point.format_range(report.units) {
            let _ = write!(out, " ({range})");
        }
        if let Some(description) = &point.description {
            let _ = write!(out, "  {description}");
        }
        out.push('\n');
    }
    out
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = parse_args(std::env::args().skip(1))?;

    let config = SkycastConfig::load().context("Failed to load configuration")?;
    logging::init(&config.logging);

    let store = Arc::new(CacheStore::from_config(&config.cache).context("Failed to open cache")?);
    let geocoding_http = Arc::new(
        ReqwestClient::new(config.geocoding.timeout())
            .context("Failed to build geocoding HTTP client")?,
    );
    let forecast_http = Arc::new(
        ReqwestClient::new(config.forecast.timeout())
            .context("Failed to build forecast HTTP client")?,
    );
    let orchestrator = WeatherOrchestrator::from_config(
        &config,
        &EnvCredentials,
        geocoding_http,
        forecast_http,
        store,
    )
    .context("Failed to set up weather lookups")?;

    let options = FetchOptions {
        skip_cache: args.fresh,
        deadline: config.request.deadline(),
    };
    match orchestrator.fetch_weather_with(&args.query, options).await {
        Ok(report) if args.text => {
            print!("{}", render_text(&report));
            Ok(ExitCode::SUCCESS)
        }
        Ok(report) => {
            let json = serde_json::to_string_pretty(&report).context("Failed to encode report")?;
            println!("{json}");
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            eprintln!("{}", failure.user_message());
            Ok(if failure.is_fault() {
                ExitCode::from(1)
            } else {
                ExitCode::from(2)
            })
        }
    }
}
