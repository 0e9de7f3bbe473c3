//! Zone selection under a bid cap.
//!
//! Hard constraints first (zone must hold one of our subnets, price must
//! be positive), then the survivors are ranked. Ranking is
//! by price, with the zone name breaking ties so the choice does not
//! depend on the order the provider lists its history in.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use spotfleet_core::{NetworkConfig, ZoneName, ZonePrice};
use spotfleet_provider::{ComputeApi, ProviderResult};

/// The zone picked for a requirement and the price observed there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneChoice {
    pub zone: ZoneName,
    pub price: f64,
}

/// Cheapest allowed, strictly positive price entry.
pub fn cheapest_allowed<'a>(
    prices: &'a [ZonePrice],
    network: &NetworkConfig,
) -> Option<&'a ZonePrice> {
    prices
        .iter()
        .filter(|p| {
            if !network.allows_zone(&p.zone) {
                debug!(zone = %p.zone, price = p.price, "ignoring spot price outside allowed zones");
                return false;
            }
            p.price.is_finite() && p.price > 0.0
        })
        .min_by(|a, b| compare_price(a, b))
}

fn compare_price(a: &ZonePrice, b: &ZonePrice) -> Ordering {
    a.price.total_cmp(&b.price).then_with(|| a.zone.cmp(&b.zone))
}

/// Selects the cheapest eligible zone for an instance type.
pub struct PriceOracle<'a, P> {
    api: &'a P,
    network: &'a NetworkConfig,
    product_description: &'a str,
}

impl<'a, P: ComputeApi> PriceOracle<'a, P> {
    pub fn new(api: &'a P, network: &'a NetworkConfig, product_description: &'a str) -> Self {
        Self {
            api,
            network,
            product_description,
        }
    }

    /// Pick the cheapest allowed zone whose price does not exceed
    /// `max_bid_price`.
    ///
    /// `Ok(None)` means the market has nothing for us right now. Errors
    /// are reserved for failures of the price lookup itself.
    pub async fn select_zone(
        &self,
        instance_type: &str,
        max_bid_price: f64,
    ) -> ProviderResult<Option<ZoneChoice>> {
        let prices = self
            .api
            .price_history(instance_type, self.product_description)
            .await?;

        let best = match cheapest_allowed(&prices, self.network) {
            Some(best) => best,
            None => {
                info!(%instance_type, "no spot price in allowed zones");
                return Ok(None);
            }
        };

        if best.price > max_bid_price {
            info!(
                %instance_type,
                zone = %best.zone,
                spot_price = best.price,
                bid_price = max_bid_price,
                "spot price higher than bid price"
            );
            return Ok(None);
        }

        info!(
            %instance_type,
            zone = %best.zone,
            spot_price = best.price,
            bid_price = max_bid_price,
            "selected zone"
        );
        Ok(Some(ZoneChoice {
            zone: best.zone.clone(),
            price: best.price,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use spotfleet_provider::SimulatedProvider;

    fn network(zones: &[&str]) -> NetworkConfig {
        NetworkConfig {
            key_name: "key".to_string(),
            security_group_ids: vec!["sg-1".to_string()],
            subnets: zones
                .iter()
                .map(|z| (z.to_string(), format!("subnet-{z}")))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn prices(entries: &[(&str, f64)]) -> Vec<ZonePrice> {
        entries
            .iter()
            .map(|(z, p)| ZonePrice::new(z, *p, 0))
            .collect()
    }

    #[test]
    fn picks_minimum_allowed_price() {
        let net = network(&["a", "b"]);
        let history = prices(&[("a", 0.30), ("b", 0.45)]);
        assert_eq!(cheapest_allowed(&history, &net).unwrap().zone, "a");
    }

    #[test]
    fn ignores_zones_outside_allow_list() {
        let net = network(&["b"]);
        let history = prices(&[("a", 0.01), ("b", 0.45)]);
        assert_eq!(cheapest_allowed(&history, &net).unwrap().zone, "b");
    }

    #[test]
    fn ignores_zero_prices() {
        let net = network(&["a", "b"]);
        let history = prices(&[("a", 0.0), ("b", 0.45)]);
        assert_eq!(cheapest_allowed(&history, &net).unwrap().zone, "b");

        let only_zero = prices(&[("a", 0.0)]);
        assert!(cheapest_allowed(&only_zero, &net).is_none());
    }

    #[test]
    fn ties_break_on_zone_name() {
        let net = network(&["a", "b", "c"]);
        let forward = prices(&[("c", 0.2), ("a", 0.2), ("b", 0.2)]);
        let reverse = prices(&[("b", 0.2), ("a", 0.2), ("c", 0.2)]);
        assert_eq!(cheapest_allowed(&forward, &net).unwrap().zone, "a");
        assert_eq!(cheapest_allowed(&reverse, &net).unwrap().zone, "a");
    }

    #[test]
    fn selection_is_always_allowed_and_minimal() {
        let net = network(&["a", "c", "e"]);
        let cases: Vec<Vec<(&str, f64)>> = vec![
            vec![("a", 0.5), ("b", 0.1), ("c", 0.4)],
            vec![("d", 0.01), ("e", 0.9)],
            vec![("a", 0.0), ("c", 0.3), ("c", 0.2), ("e", 0.25)],
            vec![("b", 0.2), ("d", 0.3)],
        ];
        for case in cases {
            let history = prices(&case);
            let allowed_min = history
                .iter()
                .filter(|p| net.allows_zone(&p.zone) && p.price > 0.0)
                .map(|p| p.price)
                .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.min(p))));
            match cheapest_allowed(&history, &net) {
                Some(best) => {
                    assert!(net.allows_zone(&best.zone));
                    assert_eq!(Some(best.price), allowed_min);
                }
                None => assert!(allowed_min.is_none()),
            }
        }
    }

    #[tokio::test]
    async fn select_zone_under_cap() {
        let provider = SimulatedProvider::new()
            .with_prices("x.large", &[("zoneA", 0.30), ("zoneB", 0.45)]);
        let net = network(&["zoneA", "zoneB"]);
        let oracle = PriceOracle::new(&provider, &net, "Linux/UNIX (Amazon VPC)");

        let choice = oracle.select_zone("x.large", 0.50).await.unwrap().unwrap();
        assert_eq!(choice.zone, "zoneA");
        assert_eq!(choice.price, 0.30);
    }

    #[tokio::test]
    async fn select_zone_over_cap_is_none() {
        let provider = SimulatedProvider::new().with_prices("x.large", &[("zoneA", 0.80)]);
        let net = network(&["zoneA", "zoneB"]);
        let oracle = PriceOracle::new(&provider, &net, "Linux/UNIX (Amazon VPC)");

        assert!(oracle.select_zone("x.large", 0.50).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn select_zone_every_allowed_zone_over_cap() {
        let provider = SimulatedProvider::new().with_prices(
            "x.large",
            &[("zoneA", 0.60), ("zoneB", 0.70), ("zoneC", 0.10)],
        );
        let net = network(&["zoneA", "zoneB"]);
        let oracle = PriceOracle::new(&provider, &net, "Linux/UNIX (Amazon VPC)");

        assert!(oracle.select_zone("x.large", 0.50).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn price_at_cap_is_accepted() {
        let provider = SimulatedProvider::new().with_prices("x.large", &[("zoneA", 0.50)]);
        let net = network(&["zoneA"]);
        let oracle = PriceOracle::new(&provider, &net, "Linux/UNIX (Amazon VPC)");

        assert!(oracle.select_zone("x.large", 0.50).await.unwrap().is_some());
    }
}
