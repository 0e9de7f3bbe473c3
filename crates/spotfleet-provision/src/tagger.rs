//! Post-provisioning tagging.

use tracing::{debug, info};

use spotfleet_core::Tag;
use spotfleet_provider::{ComputeApi, ProviderResult};

use crate::poller::BatchOutcome;

/// Applies the fleet's tag set to a resolved batch's instances.
pub struct Tagger<'a, P> {
    api: &'a P,
    tags: &'a [Tag],
}

impl<'a, P: ComputeApi> Tagger<'a, P> {
    pub fn new(api: &'a P, tags: &'a [Tag]) -> Self {
        Self { api, tags }
    }

    /// Tag every running instance of `outcome` in a single call.
    ///
    /// Cancelled and failed slots are never passed to the provider. No
    /// call is made when there is nothing to tag. Failures are returned
    /// to the caller unretried. Returns the number of instances tagged.
    pub async fn tag_batch(&self, outcome: &BatchOutcome) -> ProviderResult<usize> {
        if self.tags.is_empty() {
            debug!(batch = outcome.index, "no tags configured");
            return Ok(0);
        }

        let instance_ids = outcome.instance_ids();
        if instance_ids.is_empty() {
            debug!(batch = outcome.index, "no running instances to tag");
            return Ok(0);
        }

        self.api.create_tags(&instance_ids, self.tags).await?;
        info!(
            batch = outcome.index,
            instances = instance_ids.len(),
            tags = self.tags.len(),
            "tagged instances"
        );
        Ok(instance_ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use spotfleet_core::{SlotResolution, SpotRequest};
    use spotfleet_provider::SimulatedProvider;

    use crate::poller::BatchTermination;
    use crate::pricing::ZoneChoice;

    fn outcome(resolutions: Vec<SlotResolution>) -> BatchOutcome {
        BatchOutcome {
            index: 0,
            zone: ZoneChoice {
                zone: "us-west-2a".to_string(),
                price: 0.1,
            },
            requests: resolutions
                .into_iter()
                .enumerate()
                .map(|(slot, res)| {
                    let mut r = SpotRequest::submitted(&format!("sir-{slot}"), slot);
                    r.resolution = Some(res);
                    r
                })
                .collect(),
            termination: BatchTermination::Resolved,
            poll_rounds: 1,
        }
    }

    #[tokio::test]
    async fn tags_only_real_instances() {
        let provider = SimulatedProvider::new();
        let tags = vec![Tag::new("Name", "worker")];
        let tagger = Tagger::new(&provider, &tags);

        let tagged = tagger
            .tag_batch(&outcome(vec![
                SlotResolution::Failed,
                SlotResolution::Instance("i-1".to_string()),
                SlotResolution::Cancelled,
            ]))
            .await
            .unwrap();

        assert_eq!(tagged, 1);
        let calls = provider.tag_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].instance_ids, vec!["i-1".to_string()]);
        assert!(
            calls[0]
                .instance_ids
                .iter()
                .all(|id| id != "failed" && id != "cancelled")
        );
    }

    #[tokio::test]
    async fn no_call_when_nothing_is_running() {
        let provider = SimulatedProvider::new();
        let tags = vec![Tag::new("Name", "worker")];
        let tagger = Tagger::new(&provider, &tags);

        let tagged = tagger
            .tag_batch(&outcome(vec![SlotResolution::Failed, SlotResolution::Cancelled]))
            .await
            .unwrap();
        assert_eq!(tagged, 0);
        assert!(provider.tag_calls().is_empty());
    }

    #[tokio::test]
    async fn no_call_without_tags() {
        let provider = SimulatedProvider::new();
        let tagger = Tagger::new(&provider, &[]);

        tagger
            .tag_batch(&outcome(vec![SlotResolution::Instance("i-1".to_string())]))
            .await
            .unwrap();
        assert!(provider.tag_calls().is_empty());
    }

    #[tokio::test]
    async fn tagging_failure_propagates() {
        let provider = SimulatedProvider::new().with_tag_failure();
        let tags = vec![Tag::new("Name", "worker")];
        let tagger = Tagger::new(&provider, &tags);

        let result = tagger
            .tag_batch(&outcome(vec![SlotResolution::Instance("i-1".to_string())]))
            .await;
        assert!(result.is_err());
    }
}
