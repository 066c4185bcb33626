use std::path::Path;

use flexi_logger::{
    opt_format, Cleanup, Criterion, Duplicate, FileSpec, FlexiLoggerError, Logger, LoggerHandle,
    Naming,
};

/// Start the global logger. `RUST_LOG` takes precedence over `level`.
///
/// With a `log_dir`, output goes to rotating files there and is duplicated to
/// stderr; otherwise it goes to stderr only. Keep the returned handle alive for
/// the lifetime of the process.
pub fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<LoggerHandle, FlexiLoggerError> {
    let logger = Logger::try_with_env_or_str(level)?.format(opt_format);
    let logger = match log_dir {
        Some(dir) => logger
            .log_to_file(FileSpec::default().directory(dir).basename("c4_selfplay"))
            .duplicate_to_stderr(Duplicate::All)
            .rotate(
                Criterion::Size(10 * 1024 * 1024),
                Naming::Numbers,
                Cleanup::KeepLogFiles(3),
            ),
        None => logger.log_to_stderr(),
    };
    logger.start()
}
