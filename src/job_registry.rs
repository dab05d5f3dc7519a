use crate::errors::DecodeError;
use crate::job::Job;
use crate::model::AnyModelRef;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;

/// A decoded job instance with its concrete type erased, ready to execute on
/// a worker.
pub(crate) trait RunnableJob<Context>: Send + Sync {
    /// The model references this job declares, for resolution by the
    /// decoder.
    fn model_refs(&mut self) -> Vec<&mut dyn AnyModelRef>;

    /// Execute the job.
    fn run<'a>(&'a self, ctx: Context) -> BoxFuture<'a, anyhow::Result<()>>;

    /// Escalation hook for a job that exhausted its attempts.
    fn failed<'a>(&'a self, ctx: Context, error: &'a anyhow::Error) -> BoxFuture<'a, ()>;

    /// Re-serialize the job's current field values, for redelivery.
    fn payload(&self) -> Result<Value, serde_json::Error>;
}

impl<'a, Context> std::fmt::Debug for dyn RunnableJob<Context> + 'a {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableJob").finish_non_exhaustive()
    }
}

impl<Context, J> RunnableJob<Context> for J
where
    Context: Clone + Send + 'static,
    J: Job<Context = Context>,
{
    fn model_refs(&mut self) -> Vec<&mut dyn AnyModelRef> {
        Job::model_refs(self)
    }

    fn run<'a>(&'a self, ctx: Context) -> BoxFuture<'a, anyhow::Result<()>> {
        Job::run(self, ctx).boxed()
    }

    fn failed<'a>(&'a self, ctx: Context, error: &'a anyhow::Error) -> BoxFuture<'a, ()> {
        Job::failed(self, ctx, error).boxed()
    }

    fn payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

type DecodeFn<Context> = fn(Value) -> Result<Box<dyn RunnableJob<Context>>, serde_json::Error>;

fn decode_into<Context, J>(payload: Value) -> Result<Box<dyn RunnableJob<Context>>, serde_json::Error>
where
    Context: Clone + Send + 'static,
    J: Job<Context = Context>,
{
    let job: J = serde_json::from_value(payload)?;
    Ok(Box::new(job))
}

/// Maps registered job type names to their payload decoders.
pub(crate) struct JobRegistry<Context> {
    jobs: HashMap<&'static str, DecodeFn<Context>>,
}

impl<Context> Default for JobRegistry<Context> {
    fn default() -> Self {
        Self {
            jobs: HashMap::new(),
        }
    }
}

impl<Context: Clone + Send + 'static> JobRegistry<Context> {
    pub(crate) fn register<J: Job<Context = Context>>(&mut self) {
        self.jobs.insert(J::JOB_NAME, decode_into::<Context, J>);
    }

    /// Turn a payload back into a runnable job of the given registered type.
    pub(crate) fn decode(
        &self,
        job_type: &str,
        payload: Value,
    ) -> Result<Box<dyn RunnableJob<Context>>, DecodeError> {
        let decode = self
            .jobs
            .get(job_type)
            .ok_or_else(|| DecodeError::UnknownType(job_type.to_string()))?;
        decode(payload).map_err(DecodeError::Malformed)
    }

    pub(crate) fn job_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.jobs.keys().copied().collect();
        types.sort_unstable();
        types
    }
}
