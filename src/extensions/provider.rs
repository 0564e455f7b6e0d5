//! External key providers for `primary_key`
//!
//! Ids come from literal lists in the configuration or from HTTP endpoints
//! answering whitespace-separated ids. Fetched lists are cached on disk,
//! one file per request URL, below `{cache}/primary_key/`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::checksum::cache_key;
use crate::config::{PrimaryKeyConfig, ValidatorConfig};
use crate::key_path::KeyMembers;
use crate::uri::{join, last_path_segment};

const DEFAULT_ACCEPT: &str = "text/plain";

/// Ids obtained from providers, as canonical key strings
#[derive(Debug, Clone, Default)]
pub struct ProvidedKeys {
    /// key -> providers that listed it
    keys: BTreeMap<String, BTreeSet<String>>,
}

impl ProvidedKeys {
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    /// First provider listing `key`
    pub fn source(&self, key: &str) -> Option<&str> {
        self.keys
            .get(key)
            .and_then(|sources| sources.iter().next())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Add the ids of one provider; returns the keys some other provider already listed
    pub fn insert_all(&mut self, source: &str, ids: &[String]) -> Vec<(String, String)> {
        let mut collisions = Vec::new();
        for id in ids {
            let key = KeyMembers::provided_key(id);
            let sources = self.keys.entry(key.clone()).or_default();
            if let Some(other) = sources.iter().find(|s| s.as_str() != source) {
                collisions.push((key, other.clone()));
            }
            sources.insert(source.to_string());
        }
        collisions
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}

/// Provider lists applying to one schema
#[derive(Debug)]
pub struct KeyProviders {
    schema_uri: String,
    settings: Option<PrimaryKeyConfig>,
    cache_dir: PathBuf,
    read_only: bool,
    /// (provider label, ids) once warmed up
    lists: Option<Vec<(String, Vec<String>)>>,
}

impl KeyProviders {
    pub fn new(schema_uri: &str, config: &ValidatorConfig) -> Self {
        Self {
            schema_uri: schema_uri.to_string(),
            settings: config.primary_key.clone(),
            cache_dir: config.extension_cache_dir("primary_key"),
            read_only: config.read_only_cache,
            lists: None,
        }
    }

    /// Providers only apply to schemas under the configured prefix
    pub fn applies(&self) -> bool {
        match &self.settings {
            Some(settings) => settings
                .schema_prefix
                .as_deref()
                .map_or(true, |prefix| self.schema_uri.starts_with(prefix)),
            None => false,
        }
    }

    pub fn allow_duplicates(&self) -> bool {
        self.settings
            .as_ref()
            .map_or(false, |settings| settings.allow_provider_duplicates)
    }

    pub fn is_warm(&self) -> bool {
        self.lists.is_some()
    }

    /// Gather every provider list once
    pub fn warm_up(&mut self) {
        if self.lists.is_some() {
            return;
        }
        let mut lists = Vec::new();
        if self.applies() {
            if let Some(settings) = &self.settings {
                let segment = last_path_segment(&self.schema_uri);
                let inline = settings
                    .inline_provider
                    .get(&self.schema_uri)
                    .or_else(|| settings.inline_provider.get(segment));
                if let Some(ids) = inline {
                    lists.push(("(inline provider)".to_string(), ids.clone()));
                }

                let accept = settings.accept.as_deref().unwrap_or(DEFAULT_ACCEPT);
                for provider in &settings.provider {
                    let url = join(provider, &format!("{segment}/"));
                    match self.load_list(&url, accept) {
                        Some(ids) => lists.push((url, ids)),
                        None => warn!("Key provider {} gave no ids for {}", url, self.schema_uri),
                    }
                }
            }
        }
        self.lists = Some(lists);
    }

    fn cache_file(&self, url: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.ids", cache_key(url)))
    }

    fn load_list(&self, url: &str, accept: &str) -> Option<Vec<String>> {
        let cache_file = self.cache_file(url);
        if let Ok(cached) = fs::read_to_string(&cache_file) {
            debug!("Using cached ids from {}", cache_file.display());
            return Some(split_ids(&cached));
        }

        let body = match fetch(url, accept) {
            Ok(body) => body,
            Err(e) => {
                warn!("Unable to fetch ids from {}: {}", url, e);
                return None;
            }
        };
        if !self.read_only {
            if let Err(e) = fs::create_dir_all(&self.cache_dir).and_then(|_| fs::write(&cache_file, &body)) {
                warn!("Unable to cache ids from {} at {}: {}", url, cache_file.display(), e);
            }
        }
        let ids = split_ids(&body);
        info!("Fetched {} ids from {}", ids.len(), url);
        Some(ids)
    }

    /// Lists gathered by the last warm-up
    pub fn lists(&self) -> &[(String, Vec<String>)] {
        self.lists.as_deref().unwrap_or(&[])
    }

    /// Forget fetched lists and drop the on-disk cache
    pub fn invalidate(&mut self) {
        self.lists = None;
        if self.read_only || !self.cache_dir.exists() {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.cache_dir) {
            warn!("Unable to invalidate cache {}: {}", self.cache_dir.display(), e);
        }
    }
}

fn split_ids(body: &str) -> Vec<String> {
    body.split_whitespace().map(str::to_string).collect()
}

fn fetch(url: &str, accept: &str) -> Result<String, reqwest::Error> {
    let response = reqwest::blocking::Client::new()
        .get(url)
        .header(reqwest::header::ACCEPT, accept)
        .send()?
        .error_for_status()?;
    response.text()
}
