//! Command implementations

use crate::pack;
use anyhow::{Context as _, Result};
use auramore_host::audit::{FileAuditSink, SharedAuditSink};
use auramore_host::policy::decode_public_key;
use auramore_host::{
    LifecycleManager, ModDetails, ModSummary, PackageStore, Permission, PolicyHandle, Settings,
    SettingsWatcher, WasmSandboxRuntime, WatcherConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const AUDIT_FILE: &str = "audit.jsonl";

/// Resolved settings and data locations for one invocation
pub struct Context {
    pub settings_path: PathBuf,
    pub settings: Settings,
    pub data_dir: PathBuf,
}

impl Context {
    pub fn load(settings_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Self> {
        let settings_path = settings_path.unwrap_or_else(Settings::default_path);
        let settings = Settings::load(&settings_path)
            .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
        let data_dir = data_dir.unwrap_or_else(|| settings.data_dir());
        tracing::debug!(
            settings = %settings_path.display(),
            data_dir = %data_dir.display(),
            "Resolved paths"
        );
        Ok(Self {
            settings_path,
            settings,
            data_dir,
        })
    }

    /// Query-only view of the store; works while `run` holds the data dir
    fn query_store(&self) -> Result<PackageStore> {
        PackageStore::open_read_only(&self.data_dir)
            .with_context(|| format!("Failed to read store at {}", self.data_dir.display()))
    }

    /// Open the lifecycle manager with a wasm runtime and file audit log
    ///
    /// Fails while another process (usually `auramore run`) owns the data dir.
    async fn host(&self, policy: PolicyHandle) -> Result<LifecycleManager> {
        let store = PackageStore::open(&self.data_dir)
            .with_context(|| format!("Failed to open store at {}", self.data_dir.display()))?;
        let audit: SharedAuditSink = Arc::new(FileAuditSink::new(self.data_dir.join(AUDIT_FILE))?);
        let runtime = Arc::new(WasmSandboxRuntime::new(self.settings.sandbox.clone(), audit.clone())?);
        let manager = LifecycleManager::builder(store, runtime)
            .policy(policy)
            .audit(audit)
            .restore(self.settings.lifecycle.restore)
            .max_package_bytes(self.settings.lifecycle.max_package_bytes)
            .open()
            .await?;
        Ok(manager)
    }

    async fn one_shot_host(&self) -> Result<LifecycleManager> {
        self.host(PolicyHandle::load(self.settings.policy_config())).await
    }

    fn save_settings(&self) -> Result<()> {
        self.settings
            .save(&self.settings_path)
            .with_context(|| format!("Failed to save settings to {}", self.settings_path.display()))
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_summaries(mods: &[ModSummary]) {
    if mods.is_empty() {
        println!("No mods installed");
        return;
    }
    println!("{:<24} {:<10} {:<9} NAME", "ID", "VERSION", "STATUS");
    for m in mods {
        println!("{:<24} {:<10} {:<9} {}", m.id, m.version, m.status, m.name);
        if let Some(error) = &m.error {
            println!("{:<24} error: {}", "", error);
        }
    }
}

fn print_details(details: &ModDetails) {
    let m = &details.manifest;
    println!("{} {} ({})", m.name, m.version, m.id);
    println!("  author:       {}", m.author);
    println!("  description:  {}", m.description);
    println!("  status:       {}", details.status);
    if let Some(error) = &details.error {
        println!("  error:        {}", error);
    }
    let permissions: Vec<_> = m.permissions.iter().map(Permission::as_str).collect();
    println!("  permissions:  {}", permissions.join(", "));
    let targets: Vec<_> = m.target_os.iter().map(|os| os.as_str()).collect();
    println!("  target os:    {}", targets.join(", "));
    println!("  entry point:  {}", m.entry_point);
    println!("  content hash: {}", details.content_hash);
    println!("  installed:    {}", details.installed_at.to_rfc3339());
    if let Some(updated) = details.updated_at {
        println!("  updated:      {}", updated.to_rfc3339());
    }
}

pub fn list(ctx: &Context, json: bool) -> Result<()> {
    let mods: Vec<_> = ctx.query_store()?.list().iter().map(|r| r.summary()).collect();
    if json {
        print_json(&mods)
    } else {
        print_summaries(&mods);
        Ok(())
    }
}

pub fn info(ctx: &Context, id: &str, json: bool) -> Result<()> {
    let details = ctx.query_store()?.get(id)?.details();
    if json {
        print_json(&details)
    } else {
        print_details(&details);
        Ok(())
    }
}

pub async fn install(ctx: &Context, path: &Path, json: bool) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let manager = ctx.one_shot_host().await?;
    let result = manager.install(&bytes).await;
    manager.shutdown().await;
    let outcome = result?;

    if json {
        return print_json(&outcome);
    }
    let verb = if outcome.updated { "Updated" } else { "Installed" };
    println!("{} {} {}", verb, outcome.summary.id, outcome.summary.version);
    if !outcome.decision.allowed {
        println!("note: enabling will be refused: {}", outcome.decision.reason);
    }
    Ok(())
}

pub async fn uninstall(ctx: &Context, id: &str) -> Result<()> {
    let manager = ctx.one_shot_host().await?;
    let result = manager.uninstall(id).await;
    manager.shutdown().await;
    result?;
    println!("Uninstalled {}", id);
    Ok(())
}

pub async fn toggle(ctx: &Context, id: &str, enabled: bool) -> Result<()> {
    let manager = ctx.one_shot_host().await?;
    let result = manager.toggle(id, enabled).await;
    manager.shutdown().await;
    let summary = result?;

    match &summary.error {
        Some(error) if !summary.enabled && enabled => {
            println!("{} failed to start: {}", summary.id, error);
        }
        _ => println!("{} is {}", summary.id, summary.status),
    }
    Ok(())
}

pub fn zoom_get(ctx: &Context) {
    println!("{:.0}%", ctx.settings.zoom_level * 100.0);
}

pub fn zoom_set(ctx: &mut Context, scale: f64) -> Result<()> {
    ctx.settings.set_zoom_level(scale)?;
    ctx.save_settings()?;
    println!("Zoom set to {:.0}%", scale * 100.0);
    Ok(())
}

pub fn policy_show(ctx: &Context, json: bool) -> Result<()> {
    let config = ctx.settings.policy_config();
    if json {
        return print_json(&config);
    }
    println!("strict mode:  {}", if config.strict_mode { "on" } else { "off" });
    println!("platform:     {}", config.host_platform.as_str());
    let allowed: Vec<_> = config.allowed_permissions.iter().map(Permission::as_str).collect();
    println!("allowed:      {}", allowed.join(", "));
    if config.trusted_keys.is_empty() {
        println!("trusted keys: none");
    } else {
        println!("trusted keys:");
        for (key_id, key) in &config.trusted_keys {
            println!("  {} {}", key_id, key);
        }
    }
    Ok(())
}

pub fn policy_strict(ctx: &mut Context, on: bool) -> Result<()> {
    ctx.settings.strict_mode = on;
    ctx.save_settings()?;
    println!("Strict mode {}", if on { "on" } else { "off" });
    Ok(())
}

pub fn policy_allow(ctx: &mut Context, permission: Permission, allow: bool) -> Result<()> {
    if allow {
        ctx.settings.allowed_permissions.insert(permission);
    } else {
        ctx.settings.allowed_permissions.remove(&permission);
    }
    ctx.save_settings()?;
    println!("{} {}", if allow { "Allowed" } else { "Denied" }, permission);
    Ok(())
}

pub fn policy_trust(ctx: &mut Context, key_id: &str, public_key: Option<&str>) -> Result<()> {
    match public_key {
        Some(key) => {
            let key = key.trim();
            decode_public_key(key)
                .map_err(|e| anyhow::anyhow!("Invalid public key for {}: {}", key_id, e))?;
            ctx.settings
                .trusted_keys
                .insert(key_id.to_string(), key.to_string());
            ctx.save_settings()?;
            println!("Trusted key {}", key_id);
        }
        None => {
            if ctx.settings.trusted_keys.remove(key_id).is_none() {
                anyhow::bail!("No trusted key named {}", key_id);
            }
            ctx.save_settings()?;
            println!("Removed key {}", key_id);
        }
    }
    Ok(())
}

/// Run the host until Ctrl-C
pub async fn run(ctx: &Context) -> Result<()> {
    let policy = PolicyHandle::load(ctx.settings.policy_config());
    let watcher = SettingsWatcher::start(&ctx.settings_path, policy.clone(), WatcherConfig::default())?;
    let manager = ctx.host(policy).await?;

    tracing::info!(
        data_dir = %ctx.data_dir.display(),
        active = ?manager.attached_ids(),
        "Host running, press Ctrl-C to stop"
    );

    let mut settings = watcher.settings();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            changed = settings.changed() => {
                if changed.is_err() {
                    break;
                }
                let strict_mode = settings.borrow_and_update().strict_mode;
                tracing::info!(strict_mode, "Policy reloaded, applies to the next enable");
            }
        }
    }

    manager.shutdown().await;
    watcher.shutdown().await;
    Ok(())
}

pub fn pack(dir: &Path, output: &Path, signer: Option<(&str, &Path)>) -> Result<()> {
    let key = signer.map(|(_, path)| pack::read_signing_key(path)).transpose()?;
    let signer = signer.zip(key.as_ref()).map(|((key_id, _), key)| (key_id, key));

    let bytes = pack::pack_dir(dir, signer)?;
    std::fs::write(output, &bytes).with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}

pub fn keygen() {
    let pair = pack::generate_key();
    println!("secret: {}", pair.secret);
    println!("public: {}", pair.public);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(dir: &Path) -> Context {
        Context::load(Some(dir.join("settings.toml")), Some(dir.join("data"))).unwrap()
    }

    #[test]
    fn test_settings_commands_persist() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());

        zoom_set(&mut ctx, 1.5).unwrap();
        policy_strict(&mut ctx, true).unwrap();
        policy_allow(&mut ctx, Permission::Network, true).unwrap();
        policy_allow(&mut ctx, Permission::ReadUi, false).unwrap();

        let reloaded = context(dir.path());
        assert_eq!(reloaded.settings.zoom_level, 1.5);
        assert!(reloaded.settings.strict_mode);
        assert!(reloaded.settings.allowed_permissions.contains(&Permission::Network));
        assert!(!reloaded.settings.allowed_permissions.contains(&Permission::ReadUi));
    }

    #[test]
    fn test_zoom_out_of_range_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());

        assert!(zoom_set(&mut ctx, 4.0).is_err());
        assert!(!dir.path().join("settings.toml").exists());
    }

    #[test]
    fn test_trust_rejects_bad_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());

        assert!(policy_trust(&mut ctx, "aura", Some("not a key")).is_err());
        assert!(policy_trust(&mut ctx, "missing", None).is_err());

        assert!(ctx.settings.trusted_keys.is_empty());
        assert!(!dir.path().join("settings.toml").exists());

        let pair = pack::generate_key();
        policy_trust(&mut ctx, "aura", Some(&pair.public)).unwrap();
        assert_eq!(context(dir.path()).settings.trusted_keys["aura"], pair.public);
    }

    #[tokio::test]
    async fn test_one_shot_refused_while_data_dir_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let running = PackageStore::open(&ctx.data_dir).unwrap();

        let err = toggle(&ctx, "clock", true).await.unwrap_err();
        assert!(format!("{:#}", err).contains("in use by another auramore process"));
        assert!(uninstall(&ctx, "clock").await.is_err());

        // Queries still answer
        list(&ctx, true).unwrap();

        drop(running);
        uninstall(&ctx, "clock").await.unwrap();
    }

    #[tokio::test]
    async fn test_install_list_toggle() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let mod_dir = dir.path().join("clock");
        std::fs::create_dir_all(mod_dir.join("bin")).unwrap();
        std::fs::write(
            mod_dir.join("manifest.json"),
            serde_json::json!({
                "schema_version": 1,
                "id": "clock",
                "name": "Clock",
                "version": "1.0.0",
                "author": "Aura",
                "description": "Clock widget",
                "target_os": ["all"],
                "target_apps": ["all"],
                "permissions": [],
                "entry_point": "bin/mod.wat"
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            mod_dir.join("bin").join("mod.wat"),
            r#"(module (func (export "mod_init") (result i32) i32.const 0))"#,
        )
        .unwrap();

        let package = dir.path().join("clock.amod");
        pack(&mod_dir, &package, None).unwrap();
        install(&ctx, &package, false).await.unwrap();
        toggle(&ctx, "clock", true).await.unwrap();

        let record = ctx.query_store().unwrap().get("clock").unwrap();
        assert!(record.enabled());
        assert!(dir.path().join("data").join(AUDIT_FILE).exists());

        uninstall(&ctx, "clock").await.unwrap();
        assert!(ctx.query_store().unwrap().list().is_empty());
    }
}
