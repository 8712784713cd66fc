//! Bucket sub-resource handlers.
//!
//! Implements get/set/delete for lifecycle, CORS and website
//! configuration. The engine stores these verbatim after validation; only
//! lifecycle rules are acted on (by the lifecycle worker).

use std::collections::HashSet;

use tracing::info;

use crate::engine::ObjectEngine;
use crate::error::{StorageError, StorageResult};
use crate::retention::validate_period_days;
use crate::state::{CorsRule, LifecycleConfiguration, WebsiteConfig};

const CORS_METHODS: &[&str] = &["GET", "PUT", "POST", "DELETE", "HEAD"];
const MAX_CORS_RULES: usize = 100;
const MAX_LIFECYCLE_RULES: usize = 1000;

fn invalid(message: impl Into<String>) -> StorageError {
    StorageError::InvalidArgument {
        message: message.into(),
    }
}

fn validate_lifecycle(config: &LifecycleConfiguration) -> StorageResult<()> {
    if config.rules.is_empty() {
        return Err(invalid("lifecycle configuration has no rules"));
    }
    if config.rules.len() > MAX_LIFECYCLE_RULES {
        return Err(invalid(format!(
            "at most {MAX_LIFECYCLE_RULES} lifecycle rules are allowed"
        )));
    }
    let mut ids = HashSet::new();
    for rule in &config.rules {
        if rule.id.is_empty() || rule.id.len() > 255 {
            return Err(invalid("lifecycle rule id must be 1-255 characters"));
        }
        if !ids.insert(rule.id.as_str()) {
            return Err(invalid(format!("duplicate lifecycle rule id {}", rule.id)));
        }
        validate_period_days(
            &format!("expiration of rule {}", rule.id),
            rule.expiration_days,
            false,
        )?;
    }
    Ok(())
}

fn validate_cors(rules: &[CorsRule]) -> StorageResult<()> {
    if rules.is_empty() {
        return Err(invalid("CORS configuration has no rules"));
    }
    if rules.len() > MAX_CORS_RULES {
        return Err(invalid(format!("at most {MAX_CORS_RULES} CORS rules are allowed")));
    }
    for rule in rules {
        if rule.allowed_origins.is_empty() {
            return Err(invalid("CORS rule needs at least one allowed origin"));
        }
        if rule.allowed_methods.is_empty() {
            return Err(invalid("CORS rule needs at least one allowed method"));
        }
        if let Some(method) = rule
            .allowed_methods
            .iter()
            .find(|m| !CORS_METHODS.contains(&m.as_str()))
        {
            return Err(invalid(format!("unsupported CORS method {method}")));
        }
        for origin in &rule.allowed_origins {
            if origin.matches('*').count() > 1 {
                return Err(invalid(format!(
                    "origin {origin} may contain at most one wildcard"
                )));
            }
        }
    }
    Ok(())
}

fn validate_website(config: &WebsiteConfig) -> StorageResult<()> {
    if config.redirect_all_requests_to.is_some() {
        return Ok(());
    }
    if config.index_document.is_empty() || config.index_document.contains('/') {
        return Err(invalid(
            "index document suffix must be non-empty and must not contain a slash",
        ));
    }
    Ok(())
}

impl ObjectEngine {
    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Replace a bucket's lifecycle rules.
    pub fn set_lifecycle(
        &self,
        bucket: &str,
        config: LifecycleConfiguration,
    ) -> StorageResult<()> {
        validate_lifecycle(&config)?;
        let rules = config.rules.len();
        self.update_bucket(bucket, |b| {
            b.lifecycle = Some(config);
            Ok(())
        })?;
        info!(bucket, rules, "set lifecycle configuration");
        Ok(())
    }

    /// A bucket's lifecycle rules, if any.
    pub fn get_lifecycle(&self, bucket: &str) -> StorageResult<Option<LifecycleConfiguration>> {
        Ok(self.bucket(bucket)?.lifecycle)
    }

    /// Remove a bucket's lifecycle rules.
    pub fn delete_lifecycle(&self, bucket: &str) -> StorageResult<()> {
        self.update_bucket(bucket, |b| {
            b.lifecycle = None;
            Ok(())
        })?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // CORS
    // -----------------------------------------------------------------------

    /// Replace a bucket's CORS rules.
    pub fn set_cors(&self, bucket: &str, rules: Vec<CorsRule>) -> StorageResult<()> {
        validate_cors(&rules)?;
        self.update_bucket(bucket, |b| {
            b.cors = Some(rules);
            Ok(())
        })?;
        Ok(())
    }

    /// A bucket's CORS rules, if any.
    pub fn get_cors(&self, bucket: &str) -> StorageResult<Option<Vec<CorsRule>>> {
        Ok(self.bucket(bucket)?.cors)
    }

    /// Remove a bucket's CORS rules.
    pub fn delete_cors(&self, bucket: &str) -> StorageResult<()> {
        self.update_bucket(bucket, |b| {
            b.cors = None;
            Ok(())
        })?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Website
    // -----------------------------------------------------------------------

    /// Replace a bucket's website configuration.
    pub fn set_website(&self, bucket: &str, config: WebsiteConfig) -> StorageResult<()> {
        validate_website(&config)?;
        self.update_bucket(bucket, |b| {
            b.website = Some(config);
            Ok(())
        })?;
        Ok(())
    }

    /// A bucket's website configuration, if any.
    pub fn get_website(&self, bucket: &str) -> StorageResult<Option<WebsiteConfig>> {
        Ok(self.bucket(bucket)?.website)
    }

    /// Remove a bucket's website configuration.
    pub fn delete_website(&self, bucket: &str) -> StorageResult<()> {
        self.update_bucket(bucket, |b| {
            b.website = None;
            Ok(())
        })?;
        Ok(())
    }
}
