//! Property-based tests for prediction and attribution using proptest.

use std::sync::LazyLock;

use proptest::prelude::*;

use osteorx_core::{FeatureSchema, PatientRecord, encode};
use osteorx_ml::{ClassifierModel, ForestParams, LabeledSample, TreeExplainer};

/// Three drugs over the clinical schema; fit once and shared by every case.
static MODEL: LazyLock<ClassifierModel> = LazyLock::new(|| {
    let schema = FeatureSchema::clinical();
    let drugs = ["Alendronate", "Denosumab", "Teriparatide"];
    let sexes = ["female", "male"];
    let presence = ["yes", "no", "unknown"];
    let diabetes = ["yes_other", "yes_type2", "no", "unknown"];

    let mut samples = Vec::new();
    for i in 0..90usize {
        let class = i % 3;
        let record = PatientRecord::new()
            .with_numeric("age", 55.0 + (i % 37) as f64)
            .with_numeric("lumbar_yam", 45.0 + class as f64 * 12.0 + (i % 7) as f64)
            .with_numeric("femoral_neck_yam", 50.0 + (i % 11) as f64)
            .with_numeric("tracp5b", 250.0 + class as f64 * 150.0 + (i % 13) as f64 * 5.0)
            .with_numeric("egfr", 30.0 + (i % 50) as f64)
            .with_category("sex", sexes[i % 2])
            .with_category("fracture_history", presence[(i / 2) % 3])
            .with_category("steroid_use", presence[(i / 5) % 3])
            .with_category("diabetes", diabetes[(i / 3) % 4]);
        let features = encode(&record, &schema).unwrap_or_else(|e| panic!("row {i}: {e}"));
        samples.push(LabeledSample::new(features, drugs[class]));
    }
    let params = ForestParams {
        n_estimators: 30,
        ..ForestParams::default()
    };
    ClassifierModel::fit(&schema, samples, &params).unwrap()
});

fn record_strategy() -> impl Strategy<Value = PatientRecord> {
    (
        (40.0f64..100.0, 10.0f64..120.0, 10.0f64..120.0, 0.0f64..1500.0, 5.0f64..120.0),
        prop::sample::select(vec!["male", "female"]),
        prop::sample::select(vec!["yes", "no", "unknown"]),
        prop::sample::select(vec!["yes", "no", "unknown"]),
        prop::sample::select(vec!["yes_other", "yes_type2", "no", "unknown"]),
    )
        .prop_map(|((age, lumbar, femoral, tracp, egfr), sex, fracture, steroid, diabetes)| {
            PatientRecord::new()
                .with_numeric("age", age)
                .with_numeric("lumbar_yam", lumbar)
                .with_numeric("femoral_neck_yam", femoral)
                .with_numeric("tracp5b", tracp)
                .with_numeric("egfr", egfr)
                .with_category("sex", sex)
                .with_category("fracture_history", fracture)
                .with_category("steroid_use", steroid)
                .with_category("diabetes", diabetes)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn probabilities_form_a_distribution(record in record_strategy()) {
        let model = &*MODEL;
        let features = encode(&record, model.schema()).unwrap();
        let dist = model.predict(&features).unwrap();

        prop_assert_eq!(dist.len(), model.labels().len());
        prop_assert!((dist.sum() - 1.0).abs() < 1e-6);
        prop_assert!(dist.iter().all(|c| (0.0..=1.0).contains(&c.probability)));
    }

    #[test]
    fn top_class_is_a_model_label(record in record_strategy()) {
        let model = &*MODEL;
        let features = encode(&record, model.schema()).unwrap();
        let dist = model.predict(&features).unwrap();
        let top = dist.top().unwrap();

        prop_assert!(model.labels().contains(&top.label));
        prop_assert!(dist.iter().all(|c| c.probability <= top.probability));
    }

    #[test]
    fn attribution_reconstructs_every_class(record in record_strategy()) {
        let model = &*MODEL;
        let features = encode(&record, model.schema()).unwrap();
        let dist = model.predict(&features).unwrap();
        let explainer = TreeExplainer::new(model);

        for class in dist.iter() {
            let attribution = explainer.explain(&features, &class.label).unwrap();
            prop_assert!(
                (attribution.baseline + attribution.sum() - class.probability).abs() < 1e-4,
                "class {} off by {}",
                class.label,
                attribution.reconstruction_error()
            );
        }
    }

    #[test]
    fn explaining_does_not_change_predictions(record in record_strategy()) {
        let model = &*MODEL;
        let features = encode(&record, model.schema()).unwrap();
        let before = model.predict(&features).unwrap();
        let top = before.top().unwrap().label.clone();
        TreeExplainer::new(model).explain(&features, &top).unwrap();
        prop_assert_eq!(before, model.predict(&features).unwrap());
    }
}
