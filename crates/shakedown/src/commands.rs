use anyhow::{Context as _, anyhow};
use chrono::Utc;
use shakedown_common::{LogCategory, SessionSnapshot, Severity, StateChangeEvent};
use shakedown_engine::DebugLog;
use shakedown_engine::clock::{Clock, SystemClock};
use shakedown_engine::config::{ConfigLoader, ShakedownConfig};
use shakedown_engine::platform::EnvironmentProbe;
use shakedown_engine::platform::manifest::ManifestWorkerLifecycle;
use shakedown_engine::platform::native::{
    FileKeyValueStorage, NativeEnvironmentProbe, UnsupportedScreenCapture,
};
use shakedown_engine::recorder::{RecorderDeps, SessionRecorder};
use shakedown_engine::report::{BugReportData, BugReporter, collect_metadata};
use shakedown_engine::store::{BoundedLog, Database, SqliteDatabase};
use shakedown_engine::updates::UpdateChecker;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Production wiring shared by every subcommand.
pub struct Context {
    pub config: ShakedownConfig,
    pub data_dir: PathBuf,
    pub database: Arc<dyn Database>,
    pub clock: Arc<dyn Clock>,
}

impl Context {
    pub async fn load(
        config_path: Option<&Path>,
        data_dir: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => ConfigLoader::load_from(path)
                .await
                .with_context(|| format!("loading {}", path.display()))?,
            None => ConfigLoader::load_default().await?,
        };
        let data_dir = data_dir.unwrap_or_else(|| config.storage.resolve_data_dir());
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;

        Ok(Self {
            database: Arc::new(SqliteDatabase::new(&data_dir)),
            clock: Arc::new(SystemClock),
            config,
            data_dir,
        })
    }

    fn debug_log(&self) -> DebugLog {
        DebugLog::new(
            self.database.clone(),
            self.clock.clone(),
            &self.config.debug_log,
        )
    }

    fn sessions(&self) -> BoundedLog<SessionSnapshot> {
        BoundedLog::new(self.database.clone())
    }

    fn environment(&self) -> NativeEnvironmentProbe {
        NativeEnvironmentProbe::new(APP_VERSION)
    }
}

pub async fn logs_list(ctx: &Context) -> anyhow::Result<()> {
    for entry in ctx.debug_log().entries().await {
        println!(
            "{} [{}] {}: {}",
            entry.timestamp.to_rfc3339(),
            entry.severity,
            entry.category,
            entry.message
        );
    }
    Ok(())
}

pub async fn logs_export(ctx: &Context) -> anyhow::Result<()> {
    println!("{}", ctx.debug_log().export_json().await);
    Ok(())
}

pub async fn logs_count(ctx: &Context) -> anyhow::Result<()> {
    println!("{}", ctx.debug_log().count().await?);
    Ok(())
}

pub async fn logs_clear(ctx: &Context) -> anyhow::Result<()> {
    ctx.debug_log().clear().await?;
    info!("Debug log cleared");
    Ok(())
}

pub async fn logs_add(
    ctx: &Context,
    category: &str,
    severity: &str,
    message: String,
    payload: Option<&str>,
) -> anyhow::Result<()> {
    let category: LogCategory = category.parse().map_err(|e: String| anyhow!(e))?;
    let severity: Severity = severity.parse().map_err(|e: String| anyhow!(e))?;
    let payload = payload
        .map(|raw| serde_json::from_str::<serde_json::Value>(raw))
        .transpose()
        .context("--payload is not valid JSON")?;

    let entry = ctx
        .debug_log()
        .log(category, severity, message, payload)
        .await?;
    println!("{}", entry.id);
    Ok(())
}

pub async fn sessions_list(ctx: &Context) -> anyhow::Result<()> {
    for session in ctx.sessions().newest_first().await {
        let stats = session.stats(session.end_time.unwrap_or(session.start_time));
        println!(
            "{} {} {}ms interactions={} state_changes={} errors={}",
            session.session_id,
            session.start_time.to_rfc3339(),
            stats.duration_ms,
            stats.interaction_count,
            stats.state_change_count,
            stats.error_count
        );
    }
    Ok(())
}

pub async fn sessions_export(ctx: &Context) -> anyhow::Result<()> {
    println!("{}", ctx.sessions().export_json().await);
    Ok(())
}

pub async fn sessions_count(ctx: &Context) -> anyhow::Result<()> {
    println!("{}", ctx.sessions().count().await?);
    Ok(())
}

pub async fn sessions_clear(ctx: &Context) -> anyhow::Result<()> {
    ctx.sessions().clear_all().await?;
    info!("Session archive cleared");
    Ok(())
}

pub async fn sessions_prune(ctx: &Context, max: usize) -> anyhow::Result<()> {
    let removed = ctx.sessions().enforce_capacity(max).await?;
    println!("{}", removed);
    Ok(())
}

pub async fn record(ctx: &Context, seconds: u64) -> anyhow::Result<()> {
    let deps = RecorderDeps::new(ctx.database.clone())
        .with_clock(ctx.clock.clone())
        .with_environment(Arc::new(ctx.environment()));
    let recorder = SessionRecorder::new(ctx.config.recorder.clone(), deps);
    recorder.start();
    recorder.record_state_change(StateChangeEvent::new("record-started", ctx.clock.now()));
    info!(session_id = %recorder.session_id(), seconds, "Recording");

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, flushing session"),
    }

    recorder.record_state_change(StateChangeEvent::new("record-stopped", ctx.clock.now()));
    recorder.flush().await?;
    recorder.dispose();

    let stats = recorder.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

pub struct ReportArgs {
    pub title: String,
    pub description: String,
    pub screenshot_url: Option<String>,
    pub no_metadata: bool,
    pub repo: Option<String>,
}

pub async fn report(ctx: &Context, args: ReportArgs) -> anyhow::Result<()> {
    let mut config = ctx.config.report.clone();
    if args.repo.is_some() {
        config.repository = args.repo;
    }
    let reporter = BugReporter::new(&config, Arc::new(UnsupportedScreenCapture));

    let latest = ctx.sessions().newest_first().await.into_iter().next();
    let stats = latest.map(|s| s.stats(s.end_time.unwrap_or(s.start_time)));
    let metadata = collect_metadata(&ctx.environment().capture(), stats, Utc::now());

    let mut data = BugReportData::new(args.title, args.description);
    data.screenshot = args.screenshot_url;
    if args.no_metadata {
        data.include_metadata = Some(false);
    }

    println!("{}", reporter.prepare(&data, Some(&metadata))?);
    Ok(())
}

pub async fn check_update(ctx: &Context, manifest_url: Option<&str>) -> anyhow::Result<()> {
    let manifest_url = manifest_url
        .or(ctx.config.updates.manifest_url.as_deref())
        .ok_or_else(|| anyhow!("no manifest URL given and none configured"))?;
    let manifest_url = Url::parse(manifest_url).context("invalid manifest URL")?;

    let lifecycle = Arc::new(ManifestWorkerLifecycle::new(manifest_url, APP_VERSION));
    let storage = Arc::new(FileKeyValueStorage::new(ctx.data_dir.join("kv.json")));
    let checker = UpdateChecker::new(
        ctx.config.updates.clone(),
        lifecycle.clone(),
        storage,
        ctx.clock.clone(),
    );

    checker.check_for_update().await;
    let state = checker.state();
    checker.dispose();

    println!("{}", serde_json::to_string_pretty(&state)?);
    if let Some(version) = lifecycle.pending_version() {
        println!("New version available: {} (running {})", version, APP_VERSION);
    }
    Ok(())
}
