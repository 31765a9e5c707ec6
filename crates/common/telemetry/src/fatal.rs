// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Conditions the process must not survive.
//!
//! Store I/O failures, broken queue invariants and a saturated removal
//! backlog leave shared state that no thread can trust anymore. A panic
//! would only unwind the thread that noticed, so these go through a
//! [`FatalHandler`], which logs and then aborts the whole process.

use std::{fmt, process, sync::Arc};

use tracing::error;

type Hook = Arc<dyn Fn(&str) + Send + Sync>;

/// Ends the process after a fatal condition has been logged.
///
/// Cloning is cheap. The default handler aborts right away. A handler with a
/// hook runs it first; if the hook returns, the process still aborts, so a
/// hook can only divert control by panicking.
#[derive(Clone, Default)]
pub struct FatalHandler {
    hook: Option<Hook>,
}

impl FatalHandler {
    /// Log and abort.
    #[must_use]
    pub const fn abort() -> Self { Self { hook: None } }

    /// Run `hook` with the message before aborting.
    #[must_use]
    pub fn with_hook(hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            hook: Some(Arc::new(hook)),
        }
    }

    /// Log `message` at error level and stop.
    pub fn fail(&self, message: &str) -> ! {
        error!("{message}");
        if let Some(hook) = &self.hook {
            hook(message);
        }
        process::abort()
    }
}

impl fmt::Debug for FatalHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FatalHandler")
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{env, process::Command};

    use super::*;

    const CHILD_ENV: &str = "SPILLWAY_FATAL_CHILD";

    #[test]
    #[should_panic(expected = "FATAL: disk gone")]
    fn test_hook_sees_message() {
        let handler = FatalHandler::with_hook(|message| panic!("{message}"));
        handler.fail("FATAL: disk gone");
    }

    #[test]
    fn test_default_handler_aborts_process() {
        if env::var_os(CHILD_ENV).is_some() {
            FatalHandler::default().fail("FATAL: child");
        }

        let status = Command::new(env::current_exe().unwrap())
            .args([
                "--exact",
                "fatal::tests::test_default_handler_aborts_process",
                "--nocapture",
            ])
            .env(CHILD_ENV, "1")
            .status()
            .unwrap();
        assert!(!status.success());
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            assert_eq!(status.signal(), Some(6));
        }
    }
}
