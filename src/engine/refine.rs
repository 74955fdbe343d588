//! Discrete post-optimization refinement
//!
//! Continuous descent on the one-hot relaxation often converges to a
//! point that is valid in the relaxed space but no longer valid once
//! snapped back to real categorical/quantized values. The refiner
//! repairs those residual failures directly in raw feature space with
//! minimal single-feature edits: per pass, each still-invalid row gets
//! its most gradient-salient feature nudged by one valid quantization
//! step (numerical) or flipped to another category (categorical).

use ndarray::Array2;

use super::config::EngineConfig;
use super::loss::MixedLoss;
use super::prepare::valid_rows;
use super::setting::SearchSetting;
use crate::model::DifferentiableModel;
use crate::schema::{FeatureKind, FeatureRange, FeatureValue, Instance};
use crate::space::{argmax, TabularSpace};
use crate::Result;

/// Raw-space bound and step data of one numerical feature.
#[derive(Debug, Clone, Copy)]
struct NumericLimits {
    lo: f32,
    hi: f32,
    step: f32,
    span: f32,
}

/// Discrete single-feature refinement over a candidate batch.
pub(crate) struct DiscreteRefiner<'a> {
    space: &'a TabularSpace,
    model: &'a dyn DifferentiableModel,
    loss: &'a MixedLoss,
    config: &'a EngineConfig,
}

impl<'a> DiscreteRefiner<'a> {
    pub(crate) fn new(
        space: &'a TabularSpace,
        model: &'a dyn DifferentiableModel,
        loss: &'a MixedLoss,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            space,
            model,
            loss,
            config,
        }
    }

    /// Run up to `post_steps` refinement passes over the raw candidates.
    /// Rows whose prediction already matches the target are skipped; the
    /// loop ends early once every row is valid.
    pub(crate) fn refine(
        &self,
        mut raw: Vec<Instance>,
        origin: &Array2<f32>,
        targets: &Array2<f32>,
        mask: &Array2<f32>,
        setting: &SearchSetting,
    ) -> Result<Vec<Instance>> {
        let limits = self.numeric_limits(setting);
        for _ in 0..self.config.post_steps {
            let encoded = self.space.encode_batch(&raw)?;
            let (_, grad, pred) = self.loss.evaluate(self.model, &encoded, origin, targets);
            let valid = valid_rows(&pred, targets);
            if valid.iter().all(|&v| v) {
                break;
            }
            for r in 0..raw.len() {
                if valid[r] {
                    continue;
                }
                if let Some(col) = self.salient_column(&raw[r], &grad, mask, r, &limits) {
                    self.apply_step(&mut raw[r], &encoded, &grad, r, col, &limits);
                }
            }
        }
        Ok(raw)
    }

    /// Effective raw bounds of every numerical feature: the descriptor
    /// range narrowed by any numeric value range in the setting.
    fn numeric_limits(&self, setting: &SearchSetting) -> Vec<Option<NumericLimits>> {
        self.space
            .schema()
            .features()
            .iter()
            .map(|desc| match desc.kind() {
                FeatureKind::Numerical { min, max, precision } => {
                    let mut lo = *min;
                    let mut hi = *max;
                    if let Some(FeatureRange::Numeric { min: r_lo, max: r_hi }) =
                        setting.ranges.get(desc.name())
                    {
                        if let Some(v) = r_lo {
                            lo = lo.max(*v);
                        }
                        if let Some(v) = r_hi {
                            hi = hi.min(*v);
                        }
                    }
                    Some(NumericLimits {
                        lo,
                        hi,
                        step: *precision,
                        span: max - min,
                    })
                }
                FeatureKind::Categorical { .. } => None,
            })
            .collect()
    }

    /// The unmasked encoded dimension with the largest gradient whose
    /// discrete step is actually admissible: numeric moves must fit a
    /// whole quantization step inside the bound, categorical moves must
    /// change the arg-max category.
    fn salient_column(
        &self,
        row: &Instance,
        grad: &Array2<f32>,
        mask: &Array2<f32>,
        r: usize,
        limits: &[Option<NumericLimits>],
    ) -> Option<usize> {
        let schema = self.space.schema();
        let column_ranges = schema.column_ranges();
        let mut best: Option<(usize, f32)> = None;
        for col in 0..grad.ncols() {
            if mask[[r, col]] <= 0.0 {
                continue;
            }
            let g = grad[[r, col]];
            if g == 0.0 {
                continue;
            }
            let direction = -g.signum();
            let feature = schema.feature_of_column(col);
            match &row[feature] {
                FeatureValue::Numeric(v) => {
                    let Some(lim) = limits[feature] else { continue };
                    if direction > 0.0 && v + lim.step > lim.hi + lim.step * 1e-4 {
                        continue;
                    }
                    if direction < 0.0 && v - lim.step < lim.lo - lim.step * 1e-4 {
                        continue;
                    }
                }
                FeatureValue::Category(cat) => {
                    let desc = &schema.features()[feature];
                    if desc.width() < 2 {
                        continue;
                    }
                    let active = desc.category_index(cat);
                    let offset = col - column_ranges[feature].start;
                    let is_active = active == Some(offset);
                    // raising the active slot or lowering an inactive
                    // one leaves the arg-max untouched
                    if direction > 0.0 && is_active {
                        continue;
                    }
                    if direction < 0.0 && !is_active {
                        continue;
                    }
                }
            }
            let magnitude = g.abs();
            if best.is_none_or(|(_, b)| magnitude > b) {
                best = Some((col, magnitude));
            }
        }
        best.map(|(col, _)| col)
    }

    /// Apply one discrete step to the selected column of one raw row.
    fn apply_step(
        &self,
        row: &mut Instance,
        encoded: &Array2<f32>,
        grad: &Array2<f32>,
        r: usize,
        col: usize,
        limits: &[Option<NumericLimits>],
    ) {
        let schema = self.space.schema();
        let feature = schema.feature_of_column(col);
        let g = grad[[r, col]];
        let direction = -g.signum();
        match &mut row[feature] {
            FeatureValue::Numeric(v) => {
                let Some(lim) = limits[feature] else { return };
                let magnitude = g.abs() * self.config.lr * lim.span;
                let snapped = (magnitude / lim.step).round() * lim.step;
                let delta = direction * snapped.max(lim.step);
                *v = (*v + delta).clamp(lim.lo, lim.hi);
            }
            FeatureValue::Category(cat) => {
                let desc = &schema.features()[feature];
                let cols = schema.column_ranges()[feature].clone();
                let mut group: Vec<f32> = cols.clone().map(|c| encoded[[r, c]]).collect();
                // 1.1 dominates any dummy value in [0, 1], so the nudged
                // slot (or its strongest rival) always wins the arg-max
                group[col - cols.start] += 1.1 * direction;
                let winner = argmax(ndarray::ArrayView1::from(group.as_slice()));
                *cat = desc.categories()[winner].clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::EngineConfig;
    use crate::engine::loss::MixedLoss;
    use crate::model::LinearSoftmaxModel;
    use crate::schema::{FeatureDescriptor, FeatureSchema};
    use ndarray::{arr2, Array1};

    fn space() -> TabularSpace {
        let schema = FeatureSchema::new(vec![
            FeatureDescriptor::numerical("income", 0.0, 1000.0, 1.0).unwrap(),
            FeatureDescriptor::categorical("job", ["clerk", "manager"]).unwrap(),
        ])
        .unwrap();
        TabularSpace::new(schema, vec!["Bad".into(), "Good".into()]).unwrap()
    }

    fn config() -> EngineConfig {
        EngineConfig::new().with_lr(0.05).with_post_steps(10)
    }

    fn income_model() -> LinearSoftmaxModel {
        // Good once normalized income exceeds 0.5; job is irrelevant
        LinearSoftmaxModel::new(
            arr2(&[[-6.0, 6.0], [0.0, 0.0], [0.0, 0.0]]),
            Array1::from(vec![3.0, -3.0]),
        )
        .unwrap()
    }

    fn job_model() -> LinearSoftmaxModel {
        // Good iff job is manager
        LinearSoftmaxModel::new(
            arr2(&[[0.0, 0.0], [4.0, -4.0], [-4.0, 4.0]]),
            Array1::zeros(2),
        )
        .unwrap()
    }

    fn raw(income: f32, job: &str) -> Instance {
        vec![
            FeatureValue::Numeric(income),
            FeatureValue::Category(job.to_string()),
        ]
    }

    #[test]
    fn test_refine_repairs_numeric_row() {
        let space = space();
        let model = income_model();
        let config = config();
        let loss = MixedLoss::new(&config, Array1::ones(3), 1).unwrap();
        let refiner = DiscreteRefiner::new(&space, &model, &loss, &config);

        let candidates = vec![raw(400.0, "clerk")];
        let origin = space.encode_batch(&candidates).unwrap();
        let targets = arr2(&[[0.0, 1.0]]);
        let mask = arr2(&[[1.0, 1.0, 1.0]]);

        let refined = refiner
            .refine(candidates, &origin, &targets, &mask, &SearchSetting::new())
            .unwrap();
        let income = match &refined[0][0] {
            FeatureValue::Numeric(v) => *v,
            other => panic!("numeric feature expected, got {other:?}"),
        };
        assert!(income > 500.0, "income {income} should have crossed 500");
        let pred = model.forward(&space.encode_batch(&refined).unwrap());
        assert_eq!(crate::space::argmax(pred.row(0)), 1);
    }

    #[test]
    fn test_refine_flips_category() {
        let space = space();
        let model = job_model();
        let config = config();
        let loss = MixedLoss::new(&config, Array1::ones(3), 1).unwrap();
        let refiner = DiscreteRefiner::new(&space, &model, &loss, &config);

        let candidates = vec![raw(400.0, "clerk")];
        let origin = space.encode_batch(&candidates).unwrap();
        let targets = arr2(&[[0.0, 1.0]]);
        let mask = arr2(&[[0.0, 1.0, 1.0]]);

        let refined = refiner
            .refine(candidates, &origin, &targets, &mask, &SearchSetting::new())
            .unwrap();
        assert_eq!(refined[0][1], FeatureValue::Category("manager".to_string()));
    }

    #[test]
    fn test_refine_skips_valid_rows() {
        let space = space();
        let model = income_model();
        let config = config();
        let loss = MixedLoss::new(&config, Array1::ones(3), 1).unwrap();
        let refiner = DiscreteRefiner::new(&space, &model, &loss, &config);

        // already Good: nothing to repair, nothing may move
        let candidates = vec![raw(700.0, "clerk")];
        let origin = space.encode_batch(&candidates).unwrap();
        let targets = arr2(&[[0.0, 1.0]]);
        let mask = arr2(&[[1.0, 1.0, 1.0]]);

        let refined = refiner
            .refine(candidates.clone(), &origin, &targets, &mask, &SearchSetting::new())
            .unwrap();
        assert_eq!(refined, candidates);
    }

    #[test]
    fn test_refine_respects_mask() {
        let space = space();
        let model = income_model();
        let config = config();
        let loss = MixedLoss::new(&config, Array1::ones(3), 1).unwrap();
        let refiner = DiscreteRefiner::new(&space, &model, &loss, &config);

        // the only useful move (income) is masked off: the row must
        // come back unchanged, still invalid
        let candidates = vec![raw(400.0, "clerk")];
        let origin = space.encode_batch(&candidates).unwrap();
        let targets = arr2(&[[0.0, 1.0]]);
        let mask = arr2(&[[0.0, 1.0, 1.0]]);

        let refined = refiner
            .refine(candidates.clone(), &origin, &targets, &mask, &SearchSetting::new())
            .unwrap();
        assert_eq!(refined[0][0], candidates[0][0]);
    }

    #[test]
    fn test_refine_clamps_at_range_bound() {
        let space = space();
        let model = income_model();
        let config = config();
        let loss = MixedLoss::new(&config, Array1::ones(3), 1).unwrap();
        let refiner = DiscreteRefiner::new(&space, &model, &loss, &config);

        let mut ranges = crate::schema::RangeMap::new();
        ranges.insert("income".to_string(), FeatureRange::numeric(0.0, 450.0));
        let setting = SearchSetting::new().with_ranges(ranges);

        let candidates = vec![raw(400.0, "clerk")];
        let origin = space.encode_batch(&candidates).unwrap();
        let targets = arr2(&[[0.0, 1.0]]);
        let mask = arr2(&[[1.0, 1.0, 1.0]]);

        let refined = refiner
            .refine(candidates, &origin, &targets, &mask, &setting)
            .unwrap();
        let income = match &refined[0][0] {
            FeatureValue::Numeric(v) => *v,
            other => panic!("numeric feature expected, got {other:?}"),
        };
        assert!(income <= 450.0);
    }
}
