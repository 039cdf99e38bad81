use std::time::Duration;

use rand::{thread_rng, Rng};
use tokio::time::sleep;

use chromiumoxide::layout::Point;
use chromiumoxide::page::Page;

use crate::config::{DelayRange, HumanSection};

use super::error::{ScrapeError, ScrapeResult};
use super::fingerprint::ViewportSpec;

/// Paces page interactions to resemble a human reader: a fixed dwell after
/// navigation, an eased cursor wander, and a randomized pause.
#[derive(Debug, Clone)]
pub struct HumanPacer {
    delay_range: DelayRange,
    config: HumanSection,
}

impl HumanPacer {
    pub fn new(delay_range: DelayRange, config: HumanSection) -> Self {
        Self {
            delay_range,
            config,
        }
    }

    pub async fn pause(&self) {
        let delay = self.random_delay();
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    pub async fn settle(&self, page: &Page, viewport: ViewportSpec) -> ScrapeResult<()> {
        if self.config.settle_ms > 0 {
            sleep(Duration::from_millis(self.config.settle_ms)).await;
        }
        if self.config.cursor_wander {
            for (point, delay) in self.plan_wander(viewport) {
                page.move_mouse(point).await.map_err(|err| {
                    ScrapeError::Unexpected(format!("failed to move mouse: {err}"))
                })?;
                sleep(delay).await;
            }
        }
        self.pause().await;
        Ok(())
    }

    fn plan_wander(&self, viewport: ViewportSpec) -> Vec<(Point, Duration)> {
        let mut rng = thread_rng();
        let width = viewport.width.max(2) as f64;
        let height = viewport.height.max(2) as f64;
        let low = self.config.wander_steps[0].max(1);
        let high = self.config.wander_steps[1].max(low);
        let steps = rng.gen_range(low..=high) as usize;
        let start = Point::new(rng.gen_range(0.0..width), rng.gen_range(0.0..height));
        let target = Point::new(rng.gen_range(0.0..width), rng.gen_range(0.0..height));
        let mut moves = Vec::with_capacity(steps + 1);
        for idx in 0..=steps {
            let t = idx as f64 / steps as f64;
            let eased = ease_in_out_cubic(t);
            let x = start.x + (target.x - start.x) * eased + rng.gen_range(-1.2..=1.2);
            let y = start.y + (target.y - start.y) * eased + rng.gen_range(-1.2..=1.2);
            let point = Point::new(x.clamp(0.0, width), y.clamp(0.0, height));
            let delay = Duration::from_millis(rng.gen_range(8..=24));
            moves.push((point, delay));
        }
        moves
    }

    fn random_delay(&self) -> Duration {
        let low = self.delay_range.min.min(self.delay_range.max);
        let high = self.delay_range.max.max(self.delay_range.min);
        if high == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(thread_rng().gen_range(low..=high))
    }
}

fn ease_in_out_cubic(t: f64) -> f64 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wander_plan_stays_within_viewport() {
        let pacer = HumanPacer::new(
            DelayRange { min: 0, max: 0 },
            HumanSection {
                settle_ms: 0,
                cursor_wander: true,
                wander_steps: [8, 18],
            },
        );
        let viewport = ViewportSpec {
            width: 1_366,
            height: 768,
        };
        for _ in 0..16 {
            let plan = pacer.plan_wander(viewport);
            assert!(plan.len() >= 9 && plan.len() <= 19);
            for (point, delay) in &plan {
                assert!(point.x >= 0.0 && point.x <= 1_366.0);
                assert!(point.y >= 0.0 && point.y <= 768.0);
                assert!(*delay >= Duration::from_millis(8));
                assert!(*delay <= Duration::from_millis(24));
            }
        }
    }

    #[test]
    fn random_delay_respects_range() {
        let pacer = HumanPacer::new(
            DelayRange {
                min: 1_000,
                max: 3_000,
            },
            HumanSection::default(),
        );
        for _ in 0..64 {
            let delay = pacer.random_delay();
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay <= Duration::from_millis(3_000));
        }
    }

    #[test]
    fn easing_hits_both_endpoints() {
        assert_eq!(ease_in_out_cubic(0.0), 0.0);
        assert_eq!(ease_in_out_cubic(1.0), 1.0);
        assert!(ease_in_out_cubic(0.5) > 0.4 && ease_in_out_cubic(0.5) < 0.6);
    }
}
