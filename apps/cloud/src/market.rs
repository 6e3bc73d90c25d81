use rand::Rng;

use dock_sync::MarketPriceFeed;

/// Market price drawn uniformly from a band, rounded to four decimals.
pub struct RandomMarketPrice<R> {
    rng: R,
    min: f64,
    max: f64,
}

impl<R: Rng + Send> RandomMarketPrice<R> {
    pub fn new(rng: R, min: f64, max: f64) -> Self {
        RandomMarketPrice { rng, min, max }
    }
}

impl<R: Rng + Send> MarketPriceFeed for RandomMarketPrice<R> {
    fn current_price(&mut self) -> f64 {
        let price = self.rng.gen_range(self.min..=self.max);
        (price * 10_000.0).round() / 10_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_price_stays_in_band_with_four_decimals() {
        let mut feed = RandomMarketPrice::new(StdRng::seed_from_u64(42), 0.27, 0.68);
        for _ in 0..100 {
            let price = feed.current_price();
            assert!((0.27..=0.68).contains(&price));
            assert!(((price * 10_000.0).round() - price * 10_000.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_degenerate_band_is_constant() {
        let mut feed = RandomMarketPrice::new(StdRng::seed_from_u64(1), 0.5, 0.5);
        assert_eq!(feed.current_price(), 0.5);
    }
}
