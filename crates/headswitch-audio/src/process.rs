//! Process name lookup for migration diagnostics.

use headswitch_core::ProcessTable;

/// Looks up process names from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    #[cfg(windows)]
    fn process_name(&self, pid: u32) -> Option<String> {
        crate::win32::process_image_name(pid)
    }

    #[cfg(target_os = "linux")]
    fn process_name(&self, pid: u32) -> Option<String> {
        let comm = std::fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
        Some(comm.trim_end().to_string())
    }

    #[cfg(not(any(windows, target_os = "linux")))]
    fn process_name(&self, _pid: u32) -> Option<String> {
        None
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_has_name() {
        let name = SystemProcessTable.process_name(std::process::id());
        assert!(name.is_some_and(|n| !n.is_empty()));
    }

    #[test]
    fn test_missing_process() {
        assert_eq!(SystemProcessTable.process_name(u32::MAX), None);
    }
}
