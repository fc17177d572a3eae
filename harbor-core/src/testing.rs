//! 测试用的替身实现与夹具

use crate::backup::{
    BackupManager, BackupManagerOptions, BackupRecord, BackupSettings, BackupStore,
};
use crate::cron::{BackupRunner, CronManager, JobRegistry, ScheduleEntry, SchedulerBackend};
use crate::database::Database;
use crate::runtime::{DatabaseEngine, TargetRuntime};
use crate::storage::{CommandOutcome, ProviderRegistry, SyncTool};
use crate::target::{StaticCatalog, TargetConfig, TargetDatabase};
use crate::{HarborError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use walkdir::WalkDir;

/// 创建一个带文件树的目标，文件树位于 `<root>/<id>/wordpress`
pub(crate) fn sample_target(root: &Path, id: &str, with_database: bool) -> TargetConfig {
    let files_dir = root.join(id).join("wordpress");
    fs::create_dir_all(files_dir.join("wp-content/uploads")).unwrap();
    fs::write(files_dir.join("index.php"), "<?php echo 'hello';").unwrap();
    fs::write(files_dir.join("wp-content/uploads/logo.png"), [0u8, 1, 2, 3]).unwrap();

    TargetConfig {
        id: id.to_string(),
        files_dir,
        compose_file: None,
        web_container: None,
        file_owner: None,
        container_files_dir: None,
        database: with_database.then(|| TargetDatabase {
            container: format!("{id}_db"),
            name: "wordpress".to_string(),
            user: "root".to_string(),
            password: None,
        }),
    }
}

/// 写一个以 `root` 为根目录的 tar.gz
pub(crate) fn make_archive(path: &Path, root: &str, files: &[(&str, &str)]) {
    use flate2::Compression;
    use flate2::write::GzEncoder;

    let encoder = GzEncoder::new(fs::File::create(path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{root}/{name}"), content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// 写入固定内容的数据库引擎
#[derive(Debug, Default)]
pub(crate) struct FakeEngine {
    failing: AtomicBool,
    imports: Mutex<Vec<PathBuf>>,
}

impl FakeEngine {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn imports(&self) -> Vec<PathBuf> {
        self.imports.lock().unwrap().clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HarborError::database_operation("mysqldump: 连接被拒绝"));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseEngine for FakeEngine {
    async fn dump(&self, target: &TargetConfig, dest: &Path) -> Result<()> {
        self.check()?;
        tokio::fs::write(dest, format!("-- dump of {}\nSELECT 1;\n", target.id)).await?;
        Ok(())
    }

    async fn import(&self, _target: &TargetConfig, sql_file: &Path, _reset: bool) -> Result<()> {
        self.check()?;
        self.imports.lock().unwrap().push(sql_file.to_path_buf());
        Ok(())
    }
}

/// 记录调用的运行时
#[derive(Debug, Default)]
pub(crate) struct FakeRuntime {
    restarts: Mutex<Vec<String>>,
    execs: Mutex<Vec<Vec<String>>>,
    fail_restart: AtomicBool,
}

impl FakeRuntime {
    pub(crate) fn restart_calls(&self) -> Vec<String> {
        self.restarts.lock().unwrap().clone()
    }

    /// 每项为 [容器, 参数...]
    pub(crate) fn exec_calls(&self) -> Vec<Vec<String>> {
        self.execs.lock().unwrap().clone()
    }

    pub(crate) fn set_fail_restart(&self, fail: bool) {
        self.fail_restart.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TargetRuntime for FakeRuntime {
    async fn restart(&self, target: &TargetConfig) -> Result<()> {
        self.restarts.lock().unwrap().push(target.id.clone());
        if self.fail_restart.load(Ordering::SeqCst) {
            return Err(HarborError::docker("compose 文件不存在"));
        }
        Ok(())
    }

    async fn exec(&self, container: &str, args: &[&str], _user: Option<&str>) -> Result<Output> {
        let mut call = vec![container.to_string()];
        call.extend(args.iter().map(|a| a.to_string()));
        self.execs.lock().unwrap().push(call);
        Ok(Output {
            status: ExitStatus::from_raw(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

/// 内存中的备份记录与设置
#[derive(Debug, Default)]
pub(crate) struct MemoryBackupStore {
    records: Mutex<HashMap<String, BackupRecord>>,
    settings: Mutex<HashMap<String, BackupSettings>>,
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn get_record(&self, target_id: &str) -> Result<Option<BackupRecord>> {
        Ok(self.records.lock().unwrap().get(target_id).cloned())
    }

    async fn save_record(&self, record: &BackupRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.target_id.clone(), record.clone());
        Ok(())
    }

    async fn clear_record(&self, target_id: &str) -> Result<()> {
        self.records.lock().unwrap().remove(target_id);
        Ok(())
    }

    async fn get_settings(&self, target_id: &str) -> Result<Option<BackupSettings>> {
        Ok(self.settings.lock().unwrap().get(target_id).cloned())
    }

    async fn save_settings(&self, settings: &BackupSettings) -> Result<()> {
        self.settings
            .lock()
            .unwrap()
            .insert(settings.target_id.clone(), settings.clone());
        Ok(())
    }
}

/// 内存中的调度器
#[derive(Debug, Default)]
pub(crate) struct InMemoryScheduler {
    entries: Mutex<BTreeMap<String, ScheduleEntry>>,
}

impl InMemoryScheduler {
    pub(crate) fn entry(&self, job_id: &str) -> Option<ScheduleEntry> {
        self.entries.lock().unwrap().get(job_id).cloned()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl SchedulerBackend for InMemoryScheduler {
    async fn install(&self, entry: &ScheduleEntry) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(entry.job_id.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, job_id: &str) -> Result<bool> {
        Ok(self.entries.lock().unwrap().remove(job_id).is_some())
    }

    async fn set_enabled(&self, job_id: &str, enabled: bool) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(job_id) {
            Some(entry) => {
                entry.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// 以目录模拟 rclone 远程：`name:path` 对应 `<root>/<name>/<path>`
#[derive(Debug)]
pub(crate) struct FakeSyncTool {
    root: PathBuf,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeSyncTool {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    fn resolve(&self, location: &str) -> PathBuf {
        if location.starts_with('/') {
            return PathBuf::from(location);
        }
        let (remote, path) = location.split_once(':').unwrap_or((location, ""));
        let remote_root = self.root.join(remote);
        fs::create_dir_all(&remote_root).unwrap();
        if path.is_empty() {
            remote_root
        } else {
            remote_root.join(path)
        }
    }

    fn ok(stdout: impl Into<String>) -> CommandOutcome {
        CommandOutcome {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    fn fail(stderr: impl Into<String>) -> CommandOutcome {
        CommandOutcome {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    fn mkdir(&self, location: &str) -> CommandOutcome {
        let path = self.resolve(location);
        if path.is_dir() {
            return Self::ok("");
        }
        match path.parent() {
            Some(parent) if parent.is_dir() => {
                fs::create_dir(&path).unwrap();
                Self::ok("")
            }
            _ => Self::fail(format!("error: directory not found: {location}")),
        }
    }

    fn copy(&self, src: &str, dst: &str) -> CommandOutcome {
        let (src, dst) = (self.resolve(src), self.resolve(dst));
        if !src.is_dir() {
            return Self::fail("error: directory not found");
        }
        for entry in WalkDir::new(&src) {
            let entry = entry.unwrap();
            let target = dst.join(entry.path().strip_prefix(&src).unwrap());
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).unwrap();
            } else {
                fs::copy(entry.path(), &target).unwrap();
            }
        }
        Self::ok("")
    }

    fn copyto(&self, src: &str, dst: &str) -> CommandOutcome {
        let (src, dst) = (self.resolve(src), self.resolve(dst));
        if !src.is_file() {
            return Self::fail("error: object not found");
        }
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        fs::copy(&src, &dst).unwrap();
        Self::ok("")
    }

    fn lsjson(&self, location: &str) -> CommandOutcome {
        let dir = self.resolve(location);
        if !dir.is_dir() {
            return Self::fail("error listing: directory not found");
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).sort_by_file_name() {
            let entry = entry.unwrap();
            let metadata = entry.metadata().unwrap();
            let relative = entry.path().strip_prefix(&dir).unwrap();
            let mod_time: DateTime<Utc> = metadata.modified().unwrap().into();
            let path = relative.to_string_lossy().replace('\\', "/");
            let name = entry.file_name().to_string_lossy().to_string();
            let size: i64 = if metadata.is_dir() { -1 } else { metadata.len() as i64 };
            entries.push(serde_json::json!({
                "Path": path,
                "Name": name,
                "Size": size,
                "ModTime": mod_time.to_rfc3339(),
                "IsDir": metadata.is_dir(),
            }));
        }
        Self::ok(serde_json::Value::Array(entries).to_string())
    }

    fn delete(&self, location: &str) -> CommandOutcome {
        let dir = self.resolve(location);
        if !dir.is_dir() {
            return Self::fail("error: directory not found");
        }
        for entry in WalkDir::new(&dir) {
            let entry = entry.unwrap();
            if entry.file_type().is_file() {
                fs::remove_file(entry.path()).unwrap();
            }
        }
        Self::ok("")
    }

    fn deletefile(&self, location: &str) -> CommandOutcome {
        match fs::remove_file(self.resolve(location)) {
            Ok(()) => Self::ok(""),
            Err(_) => Self::fail("error: object not found"),
        }
    }

    fn rmdir(&self, location: &str) -> CommandOutcome {
        match fs::remove_dir(self.resolve(location)) {
            Ok(()) => Self::ok(""),
            Err(e) => Self::fail(format!("error: {e}")),
        }
    }

    fn listremotes(&self) -> CommandOutcome {
        let mut names: Vec<String> = fs::read_dir(&self.root)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().is_dir())
                    .map(|e| format!("{}:", e.file_name().to_string_lossy()))
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        Self::ok(names.join("\n"))
    }
}

#[async_trait]
impl SyncTool for FakeSyncTool {
    async fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, args: &[String]) -> Result<CommandOutcome> {
        self.calls.lock().unwrap().push(args.to_vec());

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let outcome = match args.as_slice() {
            ["mkdir", location] => self.mkdir(location),
            ["copy", src, dst] => self.copy(src, dst),
            ["copyto", src, dst] => self.copyto(src, dst),
            ["lsjson", "--recursive", location] => self.lsjson(location),
            ["delete", location] => self.delete(location),
            ["deletefile", location] => self.deletefile(location),
            ["rmdir", location] => self.rmdir(location),
            ["listremotes"] => self.listremotes(),
            other => Self::fail(format!("unsupported command: {other:?}")),
        };
        Ok(outcome)
    }

    fn tool_path(&self, host_path: &Path) -> Result<String> {
        Ok(host_path.to_string_lossy().to_string())
    }
}

/// 组装好全部管理器的测试环境，远程 `x` 由 [`FakeSyncTool`] 提供
pub(crate) struct TestEnv {
    pub dir: TempDir,
    pub db: Database,
    pub target: TargetConfig,
    pub engine: Arc<FakeEngine>,
    pub runtime: Arc<FakeRuntime>,
    pub tool: Arc<FakeSyncTool>,
    pub scheduler: Arc<InMemoryScheduler>,
    pub manager: Arc<BackupManager>,
    pub cron: CronManager,
}

impl TestEnv {
    pub(crate) async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let target = sample_target(dir.path(), "example.com", true);
        let catalog = StaticCatalog::new(vec![target.clone()]).unwrap();
        let db = Database::connect_memory().await.unwrap();

        let engine = Arc::new(FakeEngine::default());
        let runtime = Arc::new(FakeRuntime::default());
        let tool = Arc::new(FakeSyncTool::new(dir.path().join("remote")));
        let scheduler = Arc::new(InMemoryScheduler::default());

        let mut providers = ProviderRegistry::new();
        providers.set_sync_tool(tool.clone(), "backups");
        providers.discover_remotes(&["x".to_string()]).await.unwrap();

        let manager = Arc::new(BackupManager::new(
            Arc::new(catalog),
            providers,
            engine.clone(),
            runtime.clone(),
            Arc::new(db.clone()),
            BackupManagerOptions::new(dir.path().join("store"), dir.path().join("tmp")),
        ));
        let registry = JobRegistry::new(vec![Arc::new(BackupRunner::new(
            manager.clone(),
            Arc::new(db.clone()),
        ))]);
        let cron = CronManager::new(
            Arc::new(db.clone()),
            scheduler.clone(),
            registry,
            "harbor cron run-job",
        );

        Self {
            dir,
            db,
            target,
            engine,
            runtime,
            tool,
            scheduler,
            manager,
            cron,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }
}
