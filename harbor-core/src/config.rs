use crate::constants::{backup, config, cron, rclone, storage};
use crate::error::{HarborError, Result};
use crate::target::{StaticCatalog, TargetConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub rclone: RcloneConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

/// 本地存储相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    pub backup_dir: String,
    pub temp_dir: String,
    pub database_path: String,
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

/// Rclone 远程存储配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RcloneConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rclone_binary")]
    pub binary: String,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub host_mount: Option<String>,
    #[serde(default)]
    pub container_mount: Option<String>,
    #[serde(default)]
    pub remotes: Vec<String>,
    #[serde(default = "default_remote_base_path")]
    pub remote_base_path: String,
}

/// 定时任务相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CronConfig {
    #[serde(default = "default_comment_marker")]
    pub comment_marker: String,
    #[serde(default)]
    pub runner_command: Option<String>,
    #[serde(default)]
    pub crontab_user: Option<String>,
}

fn default_compression_level() -> u32 {
    backup::DEFAULT_COMPRESSION_LEVEL
}

fn default_rclone_binary() -> String {
    rclone::DEFAULT_BINARY.to_string()
}

fn default_remote_base_path() -> String {
    storage::DEFAULT_REMOTE_BASE_PATH.to_string()
}

fn default_comment_marker() -> String {
    cron::DEFAULT_COMMENT_MARKER.to_string()
}

impl Default for RcloneConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            binary: default_rclone_binary(),
            container: None,
            host_mount: None,
            container_mount: None,
            remotes: Vec::new(),
            remote_base_path: default_remote_base_path(),
        }
    }
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            comment_marker: default_comment_marker(),
            runner_command: None,
            crontab_user: None,
        }
    }
}

/// 相对路径拼接到 `base` 下并去掉 `.` 组件，绝对路径原样返回
fn resolve_against(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        return value.to_path_buf();
    }

    let mut resolved = base.to_path_buf();
    for component in value.components() {
        if component != Component::CurDir {
            resolved.push(component);
        }
    }
    resolved
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                backup_dir: backup::get_default_storage_dir()
                    .to_string_lossy()
                    .to_string(),
                temp_dir: backup::get_default_temp_dir().to_string_lossy().to_string(),
                database_path: config::get_database_path().to_string_lossy().to_string(),
                compression_level: backup::DEFAULT_COMPRESSION_LEVEL,
            },
            rclone: RcloneConfig::default(),
            cron: CronConfig::default(),
            targets: Vec::new(),
        }
    }
}

/// 仅用于把目标列表序列化为 `[[targets]]` 表
#[derive(Serialize)]
struct TargetsSection<'a> {
    targets: &'a [TargetConfig],
}

impl AppConfig {
    /// 查找并加载配置文件
    /// 优先使用显式指定的路径，否则按优先级查找：harbor.toml -> config.toml -> .harbor.toml
    pub fn find_and_load_config(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if path.exists() {
                tracing::debug!("使用配置文件: {}", path.display());
                return Self::load_from_file(path);
            }
        }

        for config_file in &config::CONFIG_FILE_CANDIDATES {
            if Path::new(config_file).exists() {
                tracing::info!("找到配置文件: {}", config_file);
                return Self::load_from_file(config_file);
            }
        }

        Err(HarborError::ConfigNotFound)
    }

    /// 从指定文件加载配置
    ///
    /// 配置中的相对路径以配置文件所在目录为基准解析为绝对路径，
    /// 这样无论从哪个工作目录（包括 cron 的 `$HOME`）启动都指向同一份数据。
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&content)?;

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let base = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            resolve_against(&std::env::current_dir()?, dir)
        };
        config.resolve_relative_paths(&base);

        config.validate()?;
        Ok(config)
    }

    /// 把存储路径与目标路径中的相对路径解析到 `base` 下
    pub fn resolve_relative_paths(&mut self, base: &Path) {
        let resolve = |value: &str| {
            resolve_against(base, Path::new(value))
                .to_string_lossy()
                .to_string()
        };

        self.storage.backup_dir = resolve(&self.storage.backup_dir);
        self.storage.temp_dir = resolve(&self.storage.temp_dir);
        self.storage.database_path = resolve(&self.storage.database_path);
        if let Some(host_mount) = &self.rclone.host_mount {
            self.rclone.host_mount = Some(resolve(host_mount));
        }

        for target in &mut self.targets {
            target.files_dir = resolve_against(base, &target.files_dir);
            if let Some(compose_file) = &target.compose_file {
                target.compose_file = Some(resolve_against(base, compose_file));
            }
        }
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml_with_comments()?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&path, content)?;
        Ok(())
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.storage.compression_level > 9 {
            return Err(HarborError::configuration(format!(
                "压缩级别必须在 0-9 之间: {}",
                self.storage.compression_level
            )));
        }
        if self.rclone.container.is_some()
            && (self.rclone.host_mount.is_some() != self.rclone.container_mount.is_some())
        {
            return Err(HarborError::configuration(
                "host_mount 与 container_mount 必须同时配置",
            ));
        }
        // 目标ID的合法性与唯一性由目录构建时检查
        self.catalog().map(|_| ())
    }

    /// 生成带注释的TOML配置
    fn to_toml_with_comments(&self) -> Result<String> {
        const TEMPLATE: &str = include_str!("../templates/config.toml.template");

        let quoted = |value: &str| toml::Value::String(value.to_string()).to_string();
        let optional = |key: &str, value: &Option<String>, example: &str| match value {
            Some(v) => format!("{key} = {}", quoted(v)),
            None => format!("# {key} = {}", quoted(example)),
        };
        let remotes = toml::Value::Array(
            self.rclone
                .remotes
                .iter()
                .map(|r| toml::Value::String(r.clone()))
                .collect(),
        )
        .to_string();

        let mut content = TEMPLATE
            .replace("{backup_dir}", &quoted(&self.storage.backup_dir))
            .replace("{temp_dir}", &quoted(&self.storage.temp_dir))
            .replace("{database_path}", &quoted(&self.storage.database_path))
            .replace(
                "{compression_level}",
                &self.storage.compression_level.to_string(),
            )
            .replace("{rclone_enabled}", &self.rclone.enabled.to_string())
            .replace("{rclone_binary}", &quoted(&self.rclone.binary))
            .replace(
                "{rclone_container}",
                &optional("container", &self.rclone.container, "rclone"),
            )
            .replace(
                "{rclone_host_mount}",
                &optional("host_mount", &self.rclone.host_mount, "/srv/backups"),
            )
            .replace(
                "{rclone_container_mount}",
                &optional("container_mount", &self.rclone.container_mount, "/data"),
            )
            .replace("{rclone_remotes}", &remotes)
            .replace("{remote_base_path}", &quoted(&self.rclone.remote_base_path))
            .replace("{comment_marker}", &quoted(&self.cron.comment_marker))
            .replace(
                "{runner_command}",
                &optional(
                    "runner_command",
                    &self.cron.runner_command,
                    "/usr/local/bin/harbor cron run-job",
                ),
            )
            .replace(
                "{crontab_user}",
                &optional("crontab_user", &self.cron.crontab_user, "root"),
            );

        content.push('\n');
        if self.targets.is_empty() {
            content.push_str(
                "# 目标示例:\n\
                 # [[targets]]\n\
                 # id = \"example.com\"\n\
                 # files_dir = \"/srv/sites/example.com/wordpress\"\n\
                 # compose_file = \"/srv/sites/example.com/docker-compose.yml\"\n\
                 # web_container = \"example.com-php\"\n\
                 # file_owner = \"www-data:www-data\"\n\
                 #\n\
                 # [targets.database]\n\
                 # container = \"example.com-mysql\"\n\
                 # name = \"wordpress\"\n\
                 # user = \"root\"\n\
                 # password = \"secret\"\n",
            );
        } else {
            content.push_str(&toml::to_string_pretty(&TargetsSection {
                targets: &self.targets,
            })?);
        }

        Ok(content)
    }

    /// 由配置构建目标目录
    pub fn catalog(&self) -> Result<StaticCatalog> {
        StaticCatalog::new(self.targets.clone())
    }

    /// 获取备份目录路径
    pub fn get_backup_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.backup_dir)
    }

    /// 获取临时目录路径
    pub fn get_temp_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.temp_dir)
    }

    /// 获取数据库文件路径
    pub fn get_database_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.database_path)
    }

    /// 确保存储相关目录存在
    pub fn ensure_storage_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.storage.backup_dir)?;
        fs::create_dir_all(&self.storage.temp_dir)?;
        if let Some(parent) = self.get_database_path().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetDatabase;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_round_trips_through_template() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("harbor.toml");

        let config = AppConfig::default();
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.get_backup_dir(), dir.path().join("backups"));
        assert_eq!(loaded.cron.comment_marker, "harbor");
        assert!(loaded.rclone.container.is_none());
        assert!(loaded.targets.is_empty());
    }

    #[test]
    fn test_targets_are_saved_as_tables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("harbor.toml");

        let mut config = AppConfig::default();
        config.rclone.remotes = vec!["gdrive".to_string()];
        config.targets.push(TargetConfig {
            id: "example.com".to_string(),
            files_dir: PathBuf::from("/srv/example.com/wordpress"),
            compose_file: None,
            web_container: Some("example.com-php".to_string()),
            file_owner: None,
            container_files_dir: None,
            database: Some(TargetDatabase {
                container: "example.com-mysql".to_string(),
                name: "wordpress".to_string(),
                user: "root".to_string(),
                password: Some("secret".to_string()),
            }),
        });
        config.save_to_file(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("[[targets]]"));

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.targets, config.targets);
        assert_eq!(loaded.rclone.remotes, vec!["gdrive".to_string()]);
    }

    #[test]
    fn test_invalid_compression_level_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("harbor.toml");

        let mut config = AppConfig::default();
        config.storage.compression_level = 12;
        fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

        let result = AppConfig::load_from_file(&path);
        assert!(matches!(result, Err(HarborError::Configuration(_))));
    }

    #[test]
    fn test_missing_config_is_reported() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        // 候选文件相对于当前目录查找，测试环境中不存在 harbor.toml
        if !Path::new("harbor.toml").exists()
            && !Path::new("config.toml").exists()
            && !Path::new(".harbor.toml").exists()
        {
            let result = AppConfig::find_and_load_config(Some(&missing));
            assert!(matches!(result, Err(HarborError::ConfigNotFound)));
        }
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let dir = tempdir().unwrap();
        let config_dir = dir.path().join("etc");
        fs::create_dir_all(&config_dir).unwrap();
        let path = config_dir.join("harbor.toml");
        fs::write(
            &path,
            r#"
[storage]
backup_dir = "./backups"
temp_dir = "backups/.temp"
database_path = "./data/harbor.db"

[rclone]
container = "rclone"
host_mount = "./backups"
container_mount = "/data"

[[targets]]
id = "example.com"
files_dir = "sites/example.com"
compose_file = "/srv/example.com/docker-compose.yml"
"#,
        )
        .unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.get_backup_dir(), config_dir.join("backups"));
        assert_eq!(loaded.get_temp_dir(), config_dir.join("backups/.temp"));
        assert_eq!(loaded.get_database_path(), config_dir.join("data/harbor.db"));
        let host_mount = config_dir.join("backups").to_string_lossy().to_string();
        assert_eq!(loaded.rclone.host_mount, Some(host_mount));
        assert_eq!(loaded.targets[0].files_dir, config_dir.join("sites/example.com"));
        assert_eq!(
            loaded.targets[0].compose_file,
            Some(PathBuf::from("/srv/example.com/docker-compose.yml"))
        );
    }

    #[test]
    fn test_resolve_against_keeps_absolute_paths() {
        let base = Path::new("/etc/harbor");
        assert_eq!(
            resolve_against(base, Path::new("/var/lib/harbor.db")),
            PathBuf::from("/var/lib/harbor.db")
        );
        assert_eq!(resolve_against(base, Path::new(".")), PathBuf::from("/etc/harbor"));
        assert_eq!(
            resolve_against(base, Path::new("./data/./harbor.db")),
            PathBuf::from("/etc/harbor/data/harbor.db")
        );
    }
}
