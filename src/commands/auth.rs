//! Auth command handlers: status, resolve and clear cached sessions.

use anyhow::{Result, bail};
use authcache_core::{AuthCacheConfig, AuthCacheManager, AuthInfo, CLEAR_ALL};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::{ClearArgs, ResolveArgs, StatusArgs};

/// One `status --json` entry: the site kind beside its snapshot report.
#[derive(Serialize)]
struct StatusEntry<'a> {
    kind: &'a str,
    #[serde(flatten)]
    info: &'a AuthInfo,
}

pub fn run_status_command(config: &AuthCacheConfig, args: &StatusArgs) -> Result<()> {
    let manager = AuthCacheManager::from_config(config.clone());

    let reports: Vec<(String, AuthInfo)> = if args.identifiers.is_empty() {
        manager
            .known_sites()
            .iter()
            .map(|site| (site.kind.to_string(), manager.store().info(site)))
            .collect()
    } else {
        args.identifiers
            .iter()
            .map(|id| (manager.resolve_site(id).kind.to_string(), manager.auth_info(id)))
            .collect()
    };

    if args.json {
        let entries: Vec<StatusEntry<'_>> = reports
            .iter()
            .map(|(kind, info)| StatusEntry { kind, info })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for (kind, info) in &reports {
        println!(
            "{kind}: {} ({})",
            info.status.as_str(),
            info.age_display.as_deref().unwrap_or("no snapshot")
        );
        if let Some(error) = &info.error {
            warn!(site = %info.site, error = %error, "cached auth unreadable");
        }
    }

    Ok(())
}

pub fn run_resolve_command(config: &AuthCacheConfig, args: &ResolveArgs) {
    let manager = AuthCacheManager::from_config(config.clone());
    let site = manager.resolve_site(&args.identifier);
    let decision = manager.freshness(&args.identifier);

    println!("site = {}", site.kind);
    println!("name = {}", site.name);
    println!("base_url = {}", site.base_url);
    println!("session_file = {}", site.session_file.display());
    println!("cookie_file = {}", site.cookie_file.display());
    println!("legacy_fallback = {}", site.legacy_fallback);
    println!("detection_rules = {}", site.detection_rules.is_some());
    println!("fresh_required = {}", decision.requires_fresh());
    println!("reason = {decision}");
}

pub fn run_clear_command(config: &AuthCacheConfig, args: &ClearArgs) -> Result<()> {
    let manager = AuthCacheManager::from_config(config.clone());
    let target = if args.all {
        CLEAR_ALL
    } else {
        match args.identifier.as_deref() {
            Some(id) => id,
            None => bail!("Specify a test identifier or --all"),
        }
    };

    let report = manager.clear(target);
    if !report.is_clean() {
        bail!(
            "Failed to delete {} cached auth file(s); see log for details",
            report.failed.len()
        );
    }

    if report.removed.is_empty() {
        info!("No cached auth files found");
    } else {
        for path in &report.removed {
            info!(path = %path.display(), "Removed cached auth file");
        }
    }

    Ok(())
}
