use crate::models::{Category, YearMonth};
use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on export attempts per month
const MAX_ATTEMPTS_CAP: u32 = 3;

pub const DEFAULT_PORTAL_URL: &str = "https://rt.molit.go.kr/pt/xls/xls.do?mobileAt=";

/// Where finished spreadsheets are pushed after a month completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTarget {
    None,
    Local(PathBuf),
    OneDrive { token: String, base_path: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub portal_url: String,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub progress_file: PathBuf,
    pub start_month: YearMonth,
    pub categories: Vec<Category>,
    pub headless: bool,
    pub chrome_bin: Option<PathBuf>,
    pub download_timeout: Duration,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub click_retry_max: u32,
    pub click_retry_wait: Duration,
    pub upload: UploadTarget,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            output_dir: PathBuf::from("output"),
            temp_dir: PathBuf::from("_rt_downloads"),
            progress_file: PathBuf::from("download_progress.json"),
            start_month: YearMonth { year: 2006, month: 1 },
            categories: Category::ALL.to_vec(),
            headless: true,
            chrome_bin: None,
            download_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            click_retry_max: 15,
            click_retry_wait: Duration::from_secs(1),
            upload: UploadTarget::None,
        }
    }
}

impl Config {
    /// Defaults overridden by `RT_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(url) = get("RT_PORTAL_URL") {
            cfg.portal_url = url;
        }
        if let Some(dir) = get("RT_OUTPUT_DIR") {
            cfg.output_dir = dir.into();
        }
        if let Some(dir) = get("RT_TEMP_DIR") {
            cfg.temp_dir = dir.into();
        }
        if let Some(file) = get("RT_PROGRESS_FILE") {
            cfg.progress_file = file.into();
        }
        if let Some(start) = get("RT_START_MONTH") {
            cfg.start_month = start.parse().context("RT_START_MONTH")?;
        }
        if let Some(list) = get("RT_CATEGORIES") {
            cfg.categories = parse_categories(&list)?;
        }
        if let Some(flag) = get("RT_HEADLESS") {
            cfg.headless = parse_bool(&flag).context("RT_HEADLESS")?;
        }
        cfg.chrome_bin = get("RT_CHROME_BIN").or_else(|| get("CHROME_BIN")).map(PathBuf::from);
        if let Some(secs) = parse_var::<u64>(&get, "RT_DOWNLOAD_TIMEOUT_SECS")? {
            cfg.download_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(&get, "RT_POLL_INTERVAL_MS")? {
            cfg.poll_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32>(&get, "RT_MAX_ATTEMPTS")? {
            cfg.max_attempts = n.clamp(1, MAX_ATTEMPTS_CAP);
        }
        if let Some(secs) = parse_var::<u64>(&get, "RT_RETRY_DELAY_SECS")? {
            cfg.retry_delay = Duration::from_secs(secs);
        }

        cfg.upload = match get("RT_UPLOAD").as_deref().map(str::trim) {
            None | Some("") | Some("none") => UploadTarget::None,
            Some("local") => {
                let dir = get("RT_UPLOAD_DIR").context("RT_UPLOAD=local needs RT_UPLOAD_DIR")?;
                UploadTarget::Local(dir.into())
            }
            Some("onedrive") => UploadTarget::OneDrive {
                token: get("ONEDRIVE_ACCESS_TOKEN")
                    .context("RT_UPLOAD=onedrive needs ONEDRIVE_ACCESS_TOKEN")?,
                base_path: get("ONEDRIVE_BASE_PATH")
                    .unwrap_or_else(|| "부동산 실거래 데이터".to_string()),
            },
            Some(other) => bail!("Unknown RT_UPLOAD target: {other}"),
        };

        Ok(cfg)
    }
}

pub fn parse_categories(list: &str) -> Result<Vec<Category>> {
    let cats = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Category::from_str)
        .collect::<Result<Vec<_>>>()?;
    if cats.is_empty() {
        bail!("Category list is empty");
    }
    Ok(cats)
}

fn parse_bool(s: &str) -> Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("Not a boolean: {other}"),
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .map(|v| v.trim().parse::<T>().with_context(|| format!("Invalid {key}: {v}")))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.portal_url, DEFAULT_PORTAL_URL);
        assert_eq!(cfg.categories.len(), 8);
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.download_timeout, Duration::from_secs(30));
        assert_eq!(cfg.upload, UploadTarget::None);
    }

    #[test]
    fn env_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("RT_START_MONTH", "202301"),
            ("RT_CATEGORIES", "아파트, 오피스텔"),
            ("RT_HEADLESS", "false"),
            ("CHROME_BIN", "/usr/bin/chromium"),
            ("RT_POLL_INTERVAL_MS", "200"),
            ("RT_UPLOAD", "local"),
            ("RT_UPLOAD_DIR", "/mnt/share"),
        ]))
        .unwrap();
        assert_eq!(cfg.start_month.to_string(), "202301");
        assert_eq!(cfg.categories, vec![Category::Apartment, Category::Officetel]);
        assert!(!cfg.headless);
        assert_eq!(cfg.chrome_bin, Some(PathBuf::from("/usr/bin/chromium")));
        assert_eq!(cfg.poll_interval, Duration::from_millis(200));
        assert_eq!(cfg.upload, UploadTarget::Local("/mnt/share".into()));
    }

    #[test]
    fn attempts_are_kept_between_one_and_three() {
        let cfg = Config::from_lookup(lookup(&[("RT_MAX_ATTEMPTS", "10")])).unwrap();
        assert_eq!(cfg.max_attempts, 3);
        let cfg = Config::from_lookup(lookup(&[("RT_MAX_ATTEMPTS", "0")])).unwrap();
        assert_eq!(cfg.max_attempts, 1);
        let cfg = Config::from_lookup(lookup(&[("RT_MAX_ATTEMPTS", "2")])).unwrap();
        assert_eq!(cfg.max_attempts, 2);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(Config::from_lookup(lookup(&[("RT_MAX_ATTEMPTS", "three")])).is_err());
        assert!(Config::from_lookup(lookup(&[("RT_UPLOAD", "onedrive")])).is_err());
        assert!(Config::from_lookup(lookup(&[("RT_CATEGORIES", "빌라")])).is_err());
    }
}
