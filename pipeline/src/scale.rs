//! The three resolution regimes (work / seam / compose) and their derived
//! cross-regime ratios.

/// `min(1, sqrt(budget_mp * 1e6 / area))`; budgets at or below zero mean
/// "keep native resolution".
pub fn scale_for_budget(megapix: f64, area: f64) -> f64 {
    if megapix <= 0.0 || area <= 0.0 {
        return 1.0;
    }
    (megapix * 1e6 / area).sqrt().min(1.0)
}

/// Set-once scale state. Each regime's factor is fixed by the first image
/// that reaches it and reused for every other image, even when native
/// resolutions differ; a deliberate simplification, not a per-image
/// optimum.
#[derive(Debug)]
pub struct ScaleRegimes {
    work_megapix: f64,
    seam_megapix: f64,
    compose_megapix: f64,
    work: Option<f64>,
    seam: Option<f64>,
    compose: Option<f64>,
}

impl ScaleRegimes {
    pub fn new(work_megapix: f64, seam_megapix: f64, compose_megapix: f64) -> Self {
        Self {
            work_megapix,
            seam_megapix,
            compose_megapix,
            work: None,
            seam: None,
            compose: None,
        }
    }

    pub fn work_scale(&mut self, area: f64) -> f64 {
        let budget = self.work_megapix;
        *self
            .work
            .get_or_insert_with(|| scale_for_budget(budget, area))
    }

    pub fn seam_scale(&mut self, area: f64) -> f64 {
        let budget = self.seam_megapix;
        *self
            .seam
            .get_or_insert_with(|| scale_for_budget(budget, area))
    }

    /// Fixed lazily: the first compose-pass image decides for all.
    pub fn compose_scale(&mut self, area: f64) -> f64 {
        let budget = self.compose_megapix;
        *self
            .compose
            .get_or_insert_with(|| scale_for_budget(budget, area))
    }

    pub fn is_compose_set(&self) -> bool {
        self.compose.is_some()
    }

    /// Ratio carrying work-scale feature results into the seam regime.
    pub fn seam_work_aspect(&self) -> f64 {
        match (self.seam, self.work) {
            (Some(seam), Some(work)) => seam / work,
            _ => 1.0,
        }
    }

    pub fn compose_work_aspect(&self) -> f64 {
        match (self.compose, self.work) {
            (Some(compose), Some(work)) => compose / work,
            _ => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn scale_is_bounded() {
        // 12 MP image with a 0.6 MP budget.
        let area = 4000.0 * 3000.0;
        let s = scale_for_budget(0.6, area);
        assert!(s > 0.0 && s <= 1.0);
        assert_relative_eq!(s, (0.6e6 / area).sqrt());
    }

    #[test]
    fn small_images_are_not_upscaled() {
        assert_relative_eq!(scale_for_budget(0.6, 100.0 * 100.0), 1.0);
        assert_relative_eq!(scale_for_budget(2.0, 2e6), 1.0);
    }

    #[test]
    fn non_positive_budget_keeps_native_resolution() {
        assert_relative_eq!(scale_for_budget(-1.0, 12e6), 1.0);
        assert_relative_eq!(scale_for_budget(0.0, 12e6), 1.0);
    }

    #[test]
    fn first_image_fixes_the_scale_for_all() {
        let mut scales = ScaleRegimes::new(0.6, 0.1, -1.0);
        let first = scales.work_scale(12e6);
        // A much smaller second image still gets the first image's factor.
        let second = scales.work_scale(1e6);
        assert_relative_eq!(first, second);
    }

    #[test]
    fn aspect_ratios_relate_regimes() {
        let mut scales = ScaleRegimes::new(0.6, 0.1, -1.0);
        let work = scales.work_scale(12e6);
        let seam = scales.seam_scale(12e6);
        assert_relative_eq!(scales.seam_work_aspect(), seam / work);

        let compose = scales.compose_scale(12e6);
        assert_relative_eq!(compose, 1.0);
        assert_relative_eq!(scales.compose_work_aspect(), 1.0 / work);
    }
}
