use anyhow::{anyhow, Context as AnyhowContext, Result};
use rquickjs::{Context, Ctx, Error as JsError, Runtime, Value};

/// Upper bound on promise jobs run per drain, so a job that keeps
/// re-queueing itself cannot starve the UI loop.
const MAX_JOBS: usize = 1000;

/// QuickJS runtime and context for the main script.
///
/// Not `Send`: it lives on the UI thread for the life of the host.
pub struct ScriptEngine {
    runtime: Runtime,
    context: Context,
}

impl ScriptEngine {
    pub fn new() -> Result<Self> {
        let runtime = Runtime::new().context("failed to create QuickJS runtime")?;
        let context = Context::full(&runtime).context("failed to create QuickJS context")?;
        Ok(Self { runtime, context })
    }

    /// Evaluate a script and discard the result.
    pub fn eval(&self, source: &str, filename: &str) -> Result<()> {
        self.eval_with::<()>(source, filename)
    }

    /// Evaluate a script and convert its completion value into `V`, then
    /// run whatever promise jobs it queued.
    pub fn eval_with<V>(&self, source: &str, filename: &str) -> Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
    {
        let script = Self::with_source_url(source, filename);
        let value = self.with_exceptions(|ctx| ctx.eval::<V, _>(script))?;
        self.execute_pending_jobs();
        Ok(value)
    }

    /// Run `f` inside the context. A thrown JS exception becomes an error
    /// carrying its message and stack.
    pub fn with_exceptions<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'js> FnOnce(Ctx<'js>) -> rquickjs::Result<T>,
    {
        self.context.with(|ctx| match f(ctx.clone()) {
            Ok(value) => Ok(value),
            Err(JsError::Exception) => Err(anyhow!(capture_exception_message(&ctx))),
            Err(err) => Err(anyhow::Error::from(err)),
        })
    }

    /// Run queued promise continuations until the queue is empty.
    ///
    /// Job failures are logged; they never propagate to the host.
    pub fn execute_pending_jobs(&self) -> usize {
        let mut job_count = 0;

        while self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => {
                    job_count += 1;
                    if job_count >= MAX_JOBS {
                        tracing::warn!(
                            target: "quickjs",
                            "Stopped processing jobs after {} iterations (possible infinite loop)",
                            MAX_JOBS
                        );
                        break;
                    }
                }
                Ok(false) => break,
                Err(job_exception) => {
                    tracing::error!(
                        target: "quickjs",
                        "Job execution error: {:?}",
                        job_exception
                    );
                    break;
                }
            }
        }

        if job_count > 0 {
            tracing::debug!(target: "quickjs", "Executed {} pending jobs", job_count);
        }
        job_count
    }

    pub fn has_pending_jobs(&self) -> bool {
        self.runtime.is_job_pending()
    }

    fn with_source_url(source: &str, filename: &str) -> Vec<u8> {
        let mut script = String::with_capacity(source.len() + filename.len() + 32);
        script.push_str(source);
        if !source.ends_with('\n') {
            script.push('\n');
        }
        script.push_str("//# sourceURL=");
        script.push_str(filename);
        script.push('\n');
        script.into_bytes()
    }
}

fn capture_exception_message(ctx: &Ctx<'_>) -> String {
    let exception: Value = ctx.catch();

    if let Some(obj) = exception.as_object() {
        if let Ok(message) = obj.get::<_, String>("message") {
            if let Ok(stack) = obj.get::<_, String>("stack") {
                if !stack.is_empty() {
                    return format!("Error: {message}\nStack: {stack}");
                }
            }
            return format!("Error: {message}");
        }
    }
    if let Some(text) = exception.as_string().and_then(|s| s.to_string().ok()) {
        return text;
    }

    format!("{exception:?}")
}
