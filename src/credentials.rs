use crate::aws::{generate_request, SignedTransport, Transport};
use crate::config::Config;
use crate::parsers::ini_parser::{parse_ini_from_file, Sections};
use crate::prelude::*;
use itertools::Itertools;
use log::{debug, info, warn};
use roxmltree::Document;
use serde::{Deserialize, Serialize};
use std::env::var;
use std::fs::File;

pub const STS_API_VERSION: &str = "2011-06-15";

#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Credential {
    pub profile: String,
    pub access_key: String,
    pub secret: String,
    pub token: String,
    pub region: String,
    pub expiration: String,
}

impl Credential {
    pub fn is_expired(&self) -> bool {
        let Ok(exp) = chrono::DateTime::parse_from_rfc3339(&self.expiration) else {
            return false;
        };
        exp < chrono::Utc::now()
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ProfileConfig {
    region: String,
    role_arn: String,
    source_profile: String,
}

trait NodeExt {
    fn find_text(&self, name: &str) -> Option<&str>;
}

impl<'input> NodeExt for Document<'input> {
    fn find_text(&self, name: &str) -> Option<&str> {
        self.descendants().find(|t| t.has_tag_name(name)).and_then(|t| t.text())
    }
}

fn get_env_credentials() -> Result<Credential> {
    Ok(Credential {
        profile: "env".into(),
        access_key: var("AWS_ACCESS_KEY_ID")?,
        secret: var("AWS_SECRET_ACCESS_KEY")?,
        token: var("AWS_SESSION_TOKEN").unwrap_or_default(),
        region: var("AWS_REGION").or_else(|_| var("AWS_DEFAULT_REGION")).unwrap_or_default(),
        ..Credential::default()
    })
}

fn profile_configs(config: &Sections) -> Vec<(String, ProfileConfig)> {
    config
        .iter()
        .filter(|(sec, _)| !sec.is_empty())
        .map(|(sec, props)| {
            let profile = sec.strip_prefix("profile ").unwrap_or(sec).trim().to_string();
            let get = |key: &str| props.get(key).cloned().unwrap_or_default();
            let conf = ProfileConfig {
                region: get("region"),
                role_arn: get("role_arn"),
                source_profile: get("source_profile"),
            };
            (profile, conf)
        })
        .collect_vec()
}

fn static_credential(credentials: &Sections, profile: &str, region: &str) -> Option<Credential> {
    let props = credentials.get(profile)?;
    Some(Credential {
        profile: profile.to_string(),
        access_key: props.get("aws_access_key_id")?.to_string(),
        secret: props.get("aws_secret_access_key")?.to_string(),
        token: props.get("aws_session_token").cloned().unwrap_or_default(),
        region: region.to_string(),
        ..Credential::default()
    })
}

fn load_cache() -> Vec<Credential> {
    let Ok(cache) = File::open(Config::cache_path()) else {
        return Vec::new();
    };
    match serde_json::from_reader::<File, Vec<Credential>>(cache) {
        Ok(creds) => creds,
        Err(err) => {
            warn!("Error deserializing credential cache: {err:#}");
            Vec::new()
        }
    }
}

fn save_cache(creds: &[Credential]) {
    match serde_json::to_string(creds) {
        Ok(json) => {
            if let Err(err) = std::fs::write(Config::cache_path(), json) {
                warn!("Can't write cache: {err:#}");
            }
        }
        Err(err) => warn!("Can't serialize cache; {err:#}"),
    }
}

/// Drops `cred` from the assumed-role cache, so that the next run assumes the role again.
pub fn clear_cache(cred: &Credential) {
    if cred.token.is_empty() {
        return;
    }
    let mut cache = load_cache();
    cache.retain(|c| c.profile != cred.profile);
    save_cache(&cache);
    info!("Cached credential for {} cleared", cred.profile);
}

fn get_sts_creds(profile: &str, conf: &ProfileConfig, source: &Credential) -> Result<Credential> {
    let region = if conf.region.is_empty() { &source.region } else { &conf.region };
    ensure!(!region.is_empty(), "No region configured for {profile}");
    let transport = SignedTransport {
        credential: source.clone(),
        endpoint: f!("https://sts.{region}.amazonaws.com"),
        api_version: STS_API_VERSION.into(),
        service_name: "sts",
    };
    let req = generate_request(
        "AssumeRole",
        [
            ("RoleSessionName", profile.replace(' ', "-")),
            ("RoleArn", conf.role_arn.clone()),
            ("DurationSeconds", "3600".to_string()),
        ],
    );
    let body = transport.execute(&req).wrap_err(f!("Error assuming role for {profile}"))?;
    assumed_credential(&body, profile, region)
}

fn assumed_credential(body: &str, profile: &str, region: &str) -> Result<Credential> {
    let doc = Document::parse(body)?;
    let field = |name: &str| {
        doc.find_text(name)
            .map(str::to_string)
            .ok_or_else(|| eyre!("can't get {name} for {profile}"))
    };
    Ok(Credential {
        access_key: field("AccessKeyId")?,
        secret: field("SecretAccessKey")?,
        token: field("SessionToken")?,
        expiration: field("Expiration")?,
        profile: profile.to_string(),
        region: region.to_string(),
    })
}

fn get_shared_credentials(profile: &str) -> Result<Credential> {
    let aws_dir = Config::aws_dir();
    let config_path = aws_dir.join("config");
    let config = if config_path.exists() { parse_ini_from_file(&config_path)? } else { Sections::new() };
    let credentials_path = aws_dir.join("credentials");
    let credentials = if credentials_path.exists() {
        parse_ini_from_file(&credentials_path)?
    } else {
        Sections::new()
    };
    let confs = profile_configs(&config);
    let conf_of = |name: &str| confs.iter().find(|(p, _)| p == name).map(|(_, c)| c);
    let conf = conf_of(profile);
    let region = conf.map(|c| c.region.as_str()).unwrap_or_default();

    if let Some(cred) = static_credential(&credentials, profile, region) {
        return Ok(cred);
    }
    let conf = conf.ok_or_else(|| eyre!("No credentials found for profile {profile}"))?;
    ensure!(
        !conf.role_arn.is_empty() && !conf.source_profile.is_empty(),
        "Profile {profile} has neither keys nor a role to assume"
    );

    let mut cache = load_cache();
    cache.retain(|c| !c.is_expired());
    if let Some(cached) = cache.iter().find(|c| c.profile == profile) {
        debug!("Using cached credential for {profile}");
        return Ok(cached.clone());
    }

    let source_region = conf_of(conf.source_profile.as_str()).map(|c| c.region.as_str()).unwrap_or(region);
    let source = static_credential(&credentials, &conf.source_profile, source_region)
        .ok_or_else(|| eyre!("No credentials found for source profile {}", conf.source_profile))?;
    let cred = get_sts_creds(profile, conf, &source)?;
    info!("Assumed {} for {profile}", conf.role_arn);
    cache.push(cred.clone());
    save_cache(&cache);
    Ok(cred)
}

/// Environment credentials win when no profile is asked for explicitly.
pub fn get_credentials(profile: Option<&str>) -> Result<Credential> {
    if profile.is_none() {
        if let Ok(cred) = get_env_credentials() {
            debug!("Using credentials from environment");
            return Ok(cred);
        }
    }
    let profile = profile.unwrap_or("default");
    get_shared_credentials(profile).wrap_err("No credentials found")
}
