//! Process-level wiring: platform, bridge and script host, then the UI loop.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::bridge::NativeBridge;
use crate::config::HostConfig;
use crate::platform::{create_platform, HostPlatform, PlatformOptions};
use crate::script::ScriptHost;

pub struct AppHost {
    // Dropped before the platform so the script's sinks are detached first.
    script: ScriptHost,
    platform: Arc<dyn HostPlatform>,
}

impl AppHost {
    /// Pick a platform and start a script host on it. Call on the thread
    /// that will run the UI loop.
    pub fn new(options: PlatformOptions) -> Result<Self> {
        let platform = create_platform(options).context("failed to initialise the platform")?;
        Self::with_platform(platform)
    }

    pub fn with_platform(platform: Arc<dyn HostPlatform>) -> Result<Self> {
        let script = ScriptHost::new(NativeBridge::new(Arc::clone(&platform)))?;
        tracing::info!(platform = platform.name(), "host initialised");
        Ok(Self { script, platform })
    }

    pub fn platform(&self) -> &Arc<dyn HostPlatform> {
        &self.platform
    }

    pub fn script(&self) -> &ScriptHost {
        &self.script
    }

    /// Run the main script once. A script that throws is logged; the host
    /// keeps serving whatever the script set up before failing.
    pub fn start(&self, source: &str, filename: &str) {
        if let Err(e) = self.script.execute(source, filename) {
            tracing::error!(target: "quickjs", filename, error = %e, "main script failed");
        }
    }

    /// Run the UI loop until the app quits. Returns the exit code.
    pub fn run(&self) -> Result<i32> {
        let script = &self.script;
        let code = self.platform.run(&mut || {
            script.drain();
        })?;
        tracing::info!(code, "host loop finished");
        Ok(code)
    }

    /// Run the UI loop until no work, script event or fetch is outstanding.
    pub fn run_until_idle(&self) -> Result<i32> {
        let script = &self.script;
        Ok(self
            .platform
            .dispatcher()
            .run_until_idle_with(&mut || script.drain())?)
    }
}

/// Load the configured script, run it and serve the UI loop until quit.
pub fn run(config: &HostConfig) -> Result<i32> {
    let source = read_script(&config.script)?;
    let host = AppHost::new(PlatformOptions {
        headless: config.headless,
        close_policy: config.close_policy,
    })?;
    host.start(&source, &config.script.to_string_lossy());
    host.run()
}

fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read main script '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window_manager::ClosePolicy;

    fn headless(policy: ClosePolicy) -> AppHost {
        AppHost::new(PlatformOptions {
            headless: true,
            close_policy: policy,
        })
        .unwrap()
    }

    #[test]
    fn app_quit_from_the_script_ends_the_loop() {
        let host = headless(ClosePolicy::KeepRunning);
        host.start("__native.appQuit();", "quit.js");
        assert_eq!(host.run().unwrap(), 0);
    }

    #[test]
    fn a_throwing_script_does_not_stop_the_host() {
        let host = headless(ClosePolicy::KeepRunning);
        host.start(
            "globalThis.before = true; throw new Error('boom');",
            "throws.js",
        );
        let before: bool = host.script().eval("before").unwrap();
        assert!(before);
        assert_eq!(host.run_until_idle().unwrap(), 0);
    }

    #[test]
    fn closing_the_last_window_quits_under_the_default_policy() {
        let host = headless(ClosePolicy::QuitWhenLastWindowCloses);
        host.start(
            "const id = __native.windowCreate({ show: true }); Promise.resolve().then(() => __native.windowClose(id));",
            "close.js",
        );
        assert_eq!(host.run().unwrap(), 0);
    }

    #[test]
    fn unreadable_scripts_are_reported_with_their_path() {
        let err = read_script(Path::new("/no/such/dir/main.js")).unwrap_err();
        assert!(format!("{err:#}").contains("/no/such/dir/main.js"));
    }
}
