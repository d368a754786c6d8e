//! 崩溃转储
//!
//! 安装 panic hook，在程序崩溃时把诊断信息写入 `<dump_dir>/<时间戳>`：
//!
//! - `<时间戳>.txt`：panic 消息、位置和回溯（所有平台）
//! - `<时间戳>.dmp`：进程 minidump（仅 Windows，`MiniDumpWriteDump`）
//!
//! 这些文件只用于事后调试，不影响程序的退出码。

use std::backtrace::Backtrace;
use std::fs;
use std::io::Write;
use std::panic::{self, PanicHookInfo};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, info};

/// 安装崩溃处理器
///
/// 原有的 panic hook 会在写完转储后继续执行。
pub fn install_crash_handler(dump_dir: impl Into<PathBuf>) {
    let dump_dir = dump_dir.into();
    let previous = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        match write_crash_report(&dump_dir, panic_info) {
            Ok(path) => error!(path = %path.display(), "Crash report written"),
            Err(e) => error!(error = %e, "Failed to write crash report"),
        }
        previous(panic_info);
    }));

    info!("Crash handler installed");
}

/// 生成转储文件的基础名（不含扩展名），形如 `2026-1018-142530`
pub fn dump_file_stem(unix_seconds: u64) -> String {
    let days = (unix_seconds / 86_400) as i64;
    let secs_of_day = unix_seconds % 86_400;
    let (year, month, day) = civil_from_days(days);

    format!(
        "{:04}-{:02}{:02}-{:02}{:02}{:02}",
        year,
        month,
        day,
        secs_of_day / 3600,
        (secs_of_day / 60) % 60,
        secs_of_day % 60
    )
}

fn write_crash_report(dump_dir: &Path, panic_info: &PanicHookInfo<'_>) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dump_dir)?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let stem = dump_file_stem(now);

    let report_path = dump_dir.join(format!("{}.txt", stem));
    let mut file = fs::File::create(&report_path)?;
    writeln!(file, "lucent {} crashed", env!("CARGO_PKG_VERSION"))?;
    writeln!(file, "{}", panic_info)?;
    writeln!(file)?;
    writeln!(file, "{}", Backtrace::force_capture())?;

    #[cfg(target_os = "windows")]
    {
        let dump_path = dump_dir.join(format!("{}.dmp", stem));
        if let Err(e) = write_minidump(&dump_path) {
            error!(error = %e, "MiniDumpWriteDump failed");
        } else {
            return Ok(dump_path);
        }
    }

    Ok(report_path)
}

#[cfg(target_os = "windows")]
fn write_minidump(path: &Path) -> std::io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Diagnostics::Debug::{MiniDumpNormal, MiniDumpWriteDump};
    use windows::Win32::System::Threading::{GetCurrentProcess, GetCurrentProcessId};

    let file = fs::File::create(path)?;

    unsafe {
        MiniDumpWriteDump(
            GetCurrentProcess(),
            GetCurrentProcessId(),
            HANDLE(file.as_raw_handle()),
            MiniDumpNormal,
            None,
            None,
            None,
        )
    }
    .map_err(|e| std::io::Error::other(e.to_string()))
}

/// 由自 1970-01-01 起的天数求公历日期
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_file_stem_epoch() {
        assert_eq!(dump_file_stem(0), "1970-0101-000000");
    }

    #[test]
    fn test_dump_file_stem_known_date() {
        // 2024-02-29 13:45:07 UTC
        assert_eq!(dump_file_stem(1_709_214_307), "2024-0229-134507");
    }
}
