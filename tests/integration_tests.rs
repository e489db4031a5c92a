//! Fetch flows exercised against mock HTTP servers.

use empire_state::config::Config;
use empire_state::error::FetchError;
use empire_state::mta::MtaFetcher;
use empire_state::output::{load_dataframe, safe_json_load};
use empire_state::retry::RetryPolicy;
use empire_state::weather::WeatherFetcher;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};

const OTP_PATH: &str = "/f6rf-2a3t.json";
const PLATFORM_PATH: &str = "/i9wp-a4ja.json";

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(1))
}

fn config_for(server: &MockServer, vars: &[(&str, &str)]) -> (TempDir, Config) {
    let root = tempfile::tempdir().unwrap();
    let vars: Vec<(String, String)> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mut config = Config::from_vars(root.path(), move |name| {
        vars.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    });
    config.ny_open_data_base = server.uri();
    config.weather_api_base = server.uri();
    config.ensure_dirs().unwrap();
    (root, config)
}

fn files_with_prefix(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
        .collect();
    files.sort();
    files
}

fn clear_sky() -> serde_json::Value {
    json!({
        "main": {"temp": 72.5, "feels_like": 70.1, "humidity": 40, "pressure": 1013},
        "weather": [{"description": "clear sky"}],
        "wind": {"speed": 5},
        "clouds": {"all": 10},
        "visibility": 10000
    })
}

#[tokio::test]
async fn test_fetch_dataset_sends_socrata_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(OTP_PATH))
        .and(query_param("$limit", "50"))
        .and(query_param("$order", ":id"))
        .and(query_param("$where", "line = 'A'"))
        .and(query_param("$$app_token", "tok-123"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"line": "A", "otp": "91.2"}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (_root, config) = config_for(&server, &[("NYC_APP_TOKEN", "tok-123")]);
    let fetcher = MtaFetcher::new(&config).unwrap();

    let records = fetcher
        .fetch_dataset("terminal_otp", 50, Some("line = 'A'"))
        .await
        .unwrap();

    assert_eq!(records, vec![json!({"line": "A", "otp": "91.2"})]);
}

#[tokio::test]
async fn test_fetch_dataset_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(OTP_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let (_root, config) = config_for(&server, &[]);
    let fetcher = MtaFetcher::new(&config).unwrap();

    let err = fetcher.fetch_dataset("terminal_otp", 10, None).await.unwrap_err();
    match err {
        FetchError::Status { status, body, .. } => {
            assert_eq!(status.as_u16(), 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fetch_dataset_rejects_non_array() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(OTP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": true})))
        .mount(&server)
        .await;

    let (_root, config) = config_for(&server, &[]);
    let fetcher = MtaFetcher::new(&config).unwrap();

    let err = fetcher.fetch_dataset("terminal_otp", 10, None).await.unwrap_err();
    assert!(matches!(err, FetchError::Parse(_)));
}

#[tokio::test]
async fn test_terminal_otp_empty_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(OTP_PATH))
        .and(query_param("$limit", "2000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let (_root, config) = config_for(&server, &[]);
    let fetcher = MtaFetcher::new(&config).unwrap().with_retry(fast_retry());

    let result = fetcher.fetch_terminal_otp().await.unwrap();

    assert!(result.is_none());
    assert!(files_with_prefix(fetcher.save_dir(), "terminal_otp").is_empty());
}

#[tokio::test]
async fn test_terminal_otp_normalizes_and_saves() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(OTP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"Line": "A", "OTP": "80", "Month-Year": "2020-01"},
            {"Line": "A", "OTP": "90", "Month-Year": "2020-02"},
            {"Line": "7", "OTP": "75.5", "Month-Year": "2020-01"}
        ])))
        .mount(&server)
        .await;

    let (_root, config) = config_for(&server, &[]);
    let fetcher = MtaFetcher::new(&config).unwrap().with_retry(fast_retry());

    let frame = fetcher.fetch_terminal_otp().await.unwrap().unwrap();

    assert_eq!(frame.columns(), ["line", "otp", "month_year"]);
    assert_eq!(frame.len(), 3);

    let saved = files_with_prefix(fetcher.save_dir(), "terminal_otp_");
    assert_eq!(saved.len(), 1);
    let content = std::fs::read_to_string(&saved[0]).unwrap();
    assert!(content.starts_with("line,otp,month_year"));
    assert_eq!(content.lines().count(), 4);

    // processed copy: csv plus snapshot under one base name
    let processed = files_with_prefix(&config.processed_data_dir, "terminal_otp_");
    assert_eq!(processed.len(), 2);
    let snapshot = processed
        .iter()
        .find(|p| p.to_str().unwrap().ends_with(".snapshot.gz"))
        .unwrap();
    assert_eq!(load_dataframe(snapshot).unwrap(), frame);
}

#[tokio::test]
async fn test_terminal_otp_collision_saves_later_values() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(OTP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"line_name": "old-A", "OTP": "80", "Line Name": "A"},
            {"line_name": "old-7", "OTP": "75", "Line Name": "7"}
        ])))
        .mount(&server)
        .await;

    let (_root, config) = config_for(&server, &[]);
    let fetcher = MtaFetcher::new(&config).unwrap().with_retry(fast_retry());

    fetcher.fetch_terminal_otp().await.unwrap().unwrap();

    let saved = files_with_prefix(fetcher.save_dir(), "terminal_otp_");
    assert_eq!(saved.len(), 1);
    let content = std::fs::read_to_string(&saved[0]).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines, ["line_name,otp", "A,80", "7,75"]);
}

#[tokio::test]
async fn test_terminal_otp_retries_then_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(OTP_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let (_root, config) = config_for(&server, &[]);
    let fetcher = MtaFetcher::new(&config).unwrap().with_retry(fast_retry());

    let err = fetcher.fetch_terminal_otp().await.unwrap_err();
    assert!(err.downcast_ref::<FetchError>().is_some());
}

#[tokio::test]
async fn test_fetch_all_summarizes_only_successes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(OTP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"line": "A", "otp": "80"},
            {"line": "C", "otp": "70"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PLATFORM_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (_root, config) = config_for(&server, &[]);
    let fetcher = MtaFetcher::new(&config).unwrap().with_retry(fast_retry());

    let results = fetcher.fetch_all().await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results["terminal_otp"].len(), 2);

    let summaries = files_with_prefix(fetcher.save_dir(), "fetch_summary_");
    assert_eq!(summaries.len(), 1);
    let summary = safe_json_load(&summaries[0]);
    assert_eq!(summary["datasets_fetched"], json!(["terminal_otp"]));
    assert_eq!(summary["record_counts"], json!({"terminal_otp": 2}));
}

#[tokio::test]
async fn test_fetch_all_without_data_writes_no_summary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let (_root, config) = config_for(&server, &[]);
    let fetcher = MtaFetcher::new(&config).unwrap().with_retry(fast_retry());

    let results = fetcher.fetch_all().await.unwrap();

    assert!(results.is_empty());
    assert!(files_with_prefix(fetcher.save_dir(), "fetch_summary_").is_empty());
}

#[tokio::test]
async fn test_weather_fetch_and_save_with_rain() {
    let server = MockServer::start().await;
    let mut current = clear_sky();
    current["rain"] = json!({"1h": 1.25});

    Mock::given(method("GET"))
        .and(path("/weather"))
        .and(query_param("lat", "40.758"))
        .and(query_param("lon", "-73.9855"))
        .and(query_param("units", "imperial"))
        .and(query_param("appid", "owm-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/forecast"))
        .and(query_param("cnt", "4"))
        .and(query_param("appid", "owm-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"cnt": 4, "list": [{}]})))
        .expect(1)
        .mount(&server)
        .await;

    let (_root, config) = config_for(&server, &[("OPENWEATHER_API_KEY", "owm-key")]);
    let fetcher = WeatherFetcher::new(&config).unwrap().with_retry(fast_retry());

    let summary = fetcher.fetch_and_save(12).await.unwrap().unwrap();

    assert_eq!(summary.temp, Some(72.5));
    assert_eq!(summary.rain_1h, Some(1.25));
    assert_eq!(summary.snow_1h, None);

    let dir = fetcher.save_dir();
    let current_files = files_with_prefix(dir, "current_");
    let forecast_files = files_with_prefix(dir, "forecast_");
    let parsed_files = files_with_prefix(dir, "parsed_");
    assert_eq!(current_files.len(), 1);
    assert_eq!(forecast_files.len(), 1);
    assert_eq!(parsed_files.len(), 1);

    // all three share one timestamp suffix
    let suffix = |p: &PathBuf, prefix: &str| {
        p.file_name().unwrap().to_str().unwrap().trim_start_matches(prefix).to_string()
    };
    assert_eq!(suffix(&current_files[0], "current_"), suffix(&parsed_files[0], "parsed_"));
    assert_eq!(suffix(&forecast_files[0], "forecast_"), suffix(&parsed_files[0], "parsed_"));

    let parsed = safe_json_load(&parsed_files[0]);
    assert_eq!(parsed["rain_1h"], json!(1.25));
    assert_eq!(parsed["description"], json!("clear sky"));
    assert!(parsed.get("snow_1h").is_none());
}

#[tokio::test]
async fn test_weather_tolerates_forecast_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weather"))
        .respond_with(ResponseTemplate::new(200).set_body_json(clear_sky()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/forecast"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let (_root, config) = config_for(&server, &[("OPENWEATHER_API_KEY", "owm-key")]);
    let fetcher = WeatherFetcher::new(&config).unwrap().with_retry(fast_retry());

    let summary = fetcher.fetch_and_save(24).await.unwrap().unwrap();

    assert_eq!(summary.description, "clear sky");
    assert!(summary.rain_1h.is_none());
    assert!(files_with_prefix(fetcher.save_dir(), "forecast_").is_empty());
    assert_eq!(files_with_prefix(fetcher.save_dir(), "parsed_").len(), 1);

    let parsed = safe_json_load(&files_with_prefix(fetcher.save_dir(), "parsed_")[0]);
    assert!(parsed.get("rain_1h").is_none());
}

#[tokio::test]
async fn test_weather_current_failure_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weather"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .expect(2)
        .mount(&server)
        .await;

    let (_root, config) = config_for(&server, &[("OPENWEATHER_API_KEY", "bad")]);
    let fetcher = WeatherFetcher::new(&config).unwrap().with_retry(fast_retry());

    let err = fetcher.fetch_and_save(24).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FetchError>(),
        Some(FetchError::Status { .. })
    ));
    assert!(files_with_prefix(fetcher.save_dir(), "parsed_").is_empty());
}

#[tokio::test]
async fn test_weather_without_key_sends_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(clear_sky()))
        .expect(0)
        .mount(&server)
        .await;

    let (_root, config) = config_for(&server, &[]);
    let fetcher = WeatherFetcher::new(&config)
        .unwrap()
        .with_retry(RetryPolicy::new(2, Duration::from_secs(2)));

    let started = std::time::Instant::now();
    let result = fetcher.fetch_and_save(24).await.unwrap();

    assert!(result.is_none());
    // returns before the first backoff would have elapsed
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(files_with_prefix(fetcher.save_dir(), "parsed_").is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}
