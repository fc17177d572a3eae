mod backup;
mod cron;

// Backup commands
pub use backup::{build_schedule, run_backup_command};

// Cron commands
pub use cron::run_cron_command;
