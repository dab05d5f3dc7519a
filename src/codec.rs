use crate::envelope::Envelope;
use crate::errors::DecodeError;
use crate::job_registry::{JobRegistry, RunnableJob};
use crate::model::ModelStore;

/// A delivery turned back into scheduling state plus an executable job, with
/// every declared model reference resolved against the store.
#[derive(Debug)]
pub(crate) struct DecodedJob<Context> {
    pub(crate) envelope: Envelope,
    pub(crate) job: Box<dyn RunnableJob<Context>>,
}

/// Decode a message body into a runnable job.
///
/// Any failure here means the message cannot be retried: the envelope is the
/// only place the attempt bookkeeping lives, so the caller acknowledges and
/// discards the message instead.
pub(crate) async fn decode<Context>(
    body: &[u8],
    registry: &JobRegistry<Context>,
    store: &dyn ModelStore,
) -> Result<DecodedJob<Context>, DecodeError>
where
    Context: Clone + Send + 'static,
{
    let envelope = Envelope::from_bytes(body)?;
    let mut job = registry.decode(&envelope.job_type, envelope.payload.clone())?;
    for reference in job.model_refs() {
        reference.resolve(store).await?;
    }
    Ok(DecodedJob { envelope, job })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use crate::model::NullStore;
    use claims::{assert_err, assert_ok};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct TestJob;

    impl Job for TestJob {
        const JOB_NAME: &'static str = "test";
        type Context = ();

        async fn run(&self, _ctx: Self::Context) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn registry() -> JobRegistry<()> {
        let mut registry = JobRegistry::default();
        registry.register::<TestJob>();
        registry
    }

    #[tokio::test]
    async fn garbage_bodies_are_malformed() {
        let error = assert_err!(decode(b"not a job", &registry(), &NullStore).await);
        assert!(matches!(error, DecodeError::Malformed(_)));
    }

    #[tokio::test]
    async fn registered_jobs_decode() {
        let envelope =
            Envelope::new(&TestJob, "queue.default", crate::queue::Schedule::Now).unwrap();
        let decoded = assert_ok!(decode(&envelope.to_bytes().unwrap(), &registry(), &NullStore).await);
        assert_eq!(decoded.envelope, envelope);
        assert_ok!(decoded.job.run(()).await);
    }

    #[tokio::test]
    async fn unregistered_job_types_fail_to_decode() {
        let envelope =
            Envelope::new(&TestJob, "queue.default", crate::queue::Schedule::Now).unwrap();
        let empty: JobRegistry<()> = JobRegistry::default();
        let error = assert_err!(decode(&envelope.to_bytes().unwrap(), &empty, &NullStore).await);
        assert!(matches!(error, DecodeError::UnknownType(name) if name == "test"));
    }
}
