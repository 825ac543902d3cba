//! Pre-trained tree ensembles and the immutable model context.
//!
//! Models are trained elsewhere and exported as JSON. An artifact names the
//! feature columns it was trained on; those names are resolved against
//! [`FeatureColumn`] when the artifact is loaded, so a contract mismatch
//! fails at startup instead of producing silently wrong scores.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::RegionEncoder;
use crate::config::Config;
use crate::error::ForestError;
use crate::features::{column_names, FeatureColumn, FeatureRow};

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Classifier,
    Regressor,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Classifier => "classifier",
            ModelKind::Regressor => "regressor",
        }
    }
}

/// A tree node. Splits send `x[feature] <= threshold` to `left`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: Vec<f64>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    kind: ModelKind,
    feature_names: Vec<String>,
    #[serde(default)]
    region_classes: Option<Vec<String>>,
    trees: Vec<Tree>,
}

/// A validated ensemble of decision trees.
#[derive(Debug, Clone)]
pub struct RandomForest {
    // ---
    kind: ModelKind,
    columns: Vec<FeatureColumn>,
    encoder: RegionEncoder,
    trees: Vec<Tree>,
}

impl RandomForest {
    pub fn from_json(json: &str) -> Result<Self, ForestError> {
        // ---
        let artifact: Artifact = serde_json::from_str(json)?;

        let columns = artifact
            .feature_names
            .iter()
            .map(|name| {
                FeatureColumn::from_name(name).ok_or_else(|| ForestError::UnknownFeature(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        validate(artifact.kind, columns.len(), &artifact.trees)?;

        let encoder = match artifact.region_classes {
            Some(classes) if !classes.is_empty() => RegionEncoder::from_classes(classes),
            _ => RegionEncoder::from_catalog(),
        };

        Ok(Self {
            kind: artifact.kind,
            columns,
            encoder,
            trees: artifact.trees,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ForestError> {
        // ---
        let json = std::fs::read_to_string(path).map_err(|source| ForestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn encoder(&self) -> &RegionEncoder {
        &self.encoder
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Leaf values reached by `x` in every tree.
    fn leaves<'a>(&'a self, x: &'a [f64]) -> impl Iterator<Item = &'a [f64]> + 'a {
        // ---
        self.trees.iter().map(move |tree| {
            let mut idx = 0;
            loop {
                match &tree.nodes[idx] {
                    Node::Leaf { value } => break value.as_slice(),
                    Node::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    } => {
                        let v = x.get(*feature).copied().unwrap_or(0.0);
                        idx = if v <= *threshold { *left } else { *right };
                    }
                }
            }
        })
    }

    fn into_kind(self, expected: ModelKind) -> Result<Self, ForestError> {
        if self.kind == expected {
            Ok(self)
        } else {
            Err(ForestError::WrongKind {
                expected: expected.as_str(),
                found: self.kind.as_str(),
            })
        }
    }
}

/// Structural checks that make traversal total.
fn validate(kind: ModelKind, n_features: usize, trees: &[Tree]) -> Result<(), ForestError> {
    // ---
    let malformed = |tree: usize, reason: String| ForestError::Malformed { tree, reason };

    if n_features == 0 {
        return Err(malformed(0, "artifact declares no feature columns".into()));
    }
    if trees.is_empty() {
        return Err(malformed(0, "artifact has no trees".into()));
    }

    for (t, tree) in trees.iter().enumerate() {
        if tree.nodes.is_empty() {
            return Err(malformed(t, "tree has no nodes".into()));
        }
        for (i, node) in tree.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(malformed(t, format!("node {i} splits on feature {feature}")));
                    }
                    for child in [*left, *right] {
                        if child <= i || child >= tree.nodes.len() {
                            return Err(malformed(t, format!("node {i} has child {child}")));
                        }
                    }
                }
                Node::Leaf { value } => match kind {
                    ModelKind::Classifier => {
                        let ok = value.len() == 2
                            && value.iter().all(|v| v.is_finite() && *v >= 0.0)
                            && value.iter().sum::<f64>() > 0.0;
                        if !ok {
                            return Err(malformed(t, format!("leaf {i} is not a 2-class weight")));
                        }
                    }
                    ModelKind::Regressor => {
                        if value.len() != 1 || !value[0].is_finite() {
                            return Err(malformed(t, format!("leaf {i} is not a single value")));
                        }
                    }
                },
            }
        }
    }
    Ok(())
}

// --- model seams

/// Scores the probability that a week is at-risk.
pub trait RiskClassifier: Send + Sync {
    fn columns(&self) -> &[FeatureColumn];
    fn encoder(&self) -> &RegionEncoder;
    fn n_trees(&self) -> usize;

    /// `[p(not at-risk), p(at-risk)]`.
    fn predict_proba(&self, x: &[f64]) -> [f64; 2];

    /// Arg-max class; ties go to class 0.
    fn predict(&self, x: &[f64]) -> u8 {
        let [p0, p1] = self.predict_proba(x);
        u8::from(p1 > p0)
    }

    fn score(&self, row: &FeatureRow) -> [f64; 2] {
        self.predict_proba(&row.project(self.columns(), self.encoder()))
    }
}

/// Projects next week's case count.
pub trait CaseRegressor: Send + Sync {
    fn columns(&self) -> &[FeatureColumn];
    fn encoder(&self) -> &RegionEncoder;
    fn n_trees(&self) -> usize;
    fn predict(&self, x: &[f64]) -> f64;

    fn score(&self, row: &FeatureRow) -> f64 {
        self.predict(&row.project(self.columns(), self.encoder()))
    }
}

#[derive(Debug, Clone)]
pub struct ForestClassifier(RandomForest);

impl ForestClassifier {
    pub fn new(forest: RandomForest) -> Result<Self, ForestError> {
        forest.into_kind(ModelKind::Classifier).map(Self)
    }

    pub fn load(path: &Path) -> Result<Self, ForestError> {
        Self::new(RandomForest::load(path)?)
    }
}

impl RiskClassifier for ForestClassifier {
    fn columns(&self) -> &[FeatureColumn] {
        self.0.columns()
    }

    fn encoder(&self) -> &RegionEncoder {
        self.0.encoder()
    }

    fn n_trees(&self) -> usize {
        self.0.n_trees()
    }

    fn predict_proba(&self, x: &[f64]) -> [f64; 2] {
        // ---
        let mut acc = [0.0; 2];
        for leaf in self.0.leaves(x) {
            let total: f64 = leaf.iter().sum();
            acc[0] += leaf[0] / total;
            acc[1] += leaf[1] / total;
        }
        let n = self.0.n_trees() as f64;
        [acc[0] / n, acc[1] / n]
    }
}

#[derive(Debug, Clone)]
pub struct ForestRegressor(RandomForest);

impl ForestRegressor {
    pub fn new(forest: RandomForest) -> Result<Self, ForestError> {
        forest.into_kind(ModelKind::Regressor).map(Self)
    }

    pub fn load(path: &Path) -> Result<Self, ForestError> {
        Self::new(RandomForest::load(path)?)
    }
}

impl CaseRegressor for ForestRegressor {
    fn columns(&self) -> &[FeatureColumn] {
        self.0.columns()
    }

    fn encoder(&self) -> &RegionEncoder {
        self.0.encoder()
    }

    fn n_trees(&self) -> usize {
        self.0.n_trees()
    }

    fn predict(&self, x: &[f64]) -> f64 {
        let sum: f64 = self.0.leaves(x).map(|leaf| leaf[0]).sum();
        sum / self.0.n_trees() as f64
    }
}

// --- context

/// Models loaded once at startup and shared read-only by every request.
#[derive(Clone, Default)]
pub struct ModelContext {
    pub classifier: Option<Arc<dyn RiskClassifier>>,
    pub regressor: Option<Arc<dyn CaseRegressor>>,
}

/// Load state of one model, as reported by the API.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub loaded: bool,
    pub trees: usize,
    pub columns: Vec<&'static str>,
}

impl ModelContext {
    pub fn new(
        classifier: Option<Arc<dyn RiskClassifier>>,
        regressor: Option<Arc<dyn CaseRegressor>>,
    ) -> Self {
        Self {
            classifier,
            regressor,
        }
    }

    /// Load both artifacts named in `config`. Failures are logged and leave
    /// the model absent.
    pub fn load(config: &Config) -> Self {
        // ---
        let classifier = match ForestClassifier::load(&config.classifier_model) {
            Ok(m) => {
                tracing::info!(
                    path = %config.classifier_model.display(),
                    trees = m.n_trees(),
                    "risk classifier loaded"
                );
                Some(Arc::new(m) as Arc<dyn RiskClassifier>)
            }
            Err(e) => {
                tracing::error!(
                    path = %config.classifier_model.display(),
                    error = %e,
                    "risk classifier unavailable, risk endpoints will answer 503"
                );
                None
            }
        };

        let regressor = match ForestRegressor::load(&config.regressor_model) {
            Ok(m) => {
                tracing::info!(
                    path = %config.regressor_model.display(),
                    trees = m.n_trees(),
                    "case regressor loaded"
                );
                Some(Arc::new(m) as Arc<dyn CaseRegressor>)
            }
            Err(e) => {
                tracing::warn!(
                    path = %config.regressor_model.display(),
                    error = %e,
                    "case regressor unavailable, using weighted average projection"
                );
                None
            }
        };

        Self::new(classifier, regressor)
    }

    pub fn classifier_info(&self) -> ModelInfo {
        match &self.classifier {
            Some(m) => ModelInfo {
                loaded: true,
                trees: m.n_trees(),
                columns: column_names(m.columns()),
            },
            None => ModelInfo {
                loaded: false,
                trees: 0,
                columns: Vec::new(),
            },
        }
    }

    pub fn regressor_info(&self) -> ModelInfo {
        match &self.regressor {
            Some(m) => ModelInfo {
                loaded: true,
                trees: m.n_trees(),
                columns: column_names(m.columns()),
            },
            None => ModelInfo {
                loaded: false,
                trees: 0,
                columns: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    /// Two stumps on `cases_lag_1w`; the second tree disagrees above 50.
    const CLASSIFIER: &str = r#"{
        "kind": "classifier",
        "feature_names": ["cases_lag_1w", "trend_4w"],
        "trees": [
            {"nodes": [
                {"feature": 0, "threshold": 10.0, "left": 1, "right": 2},
                {"value": [9.0, 1.0]},
                {"value": [2.0, 8.0]}
            ]},
            {"nodes": [
                {"feature": 0, "threshold": 50.0, "left": 1, "right": 2},
                {"value": [1.0, 1.0]},
                {"value": [0.0, 4.0]}
            ]}
        ]
    }"#;

    const REGRESSOR: &str = r#"{
        "kind": "regressor",
        "feature_names": ["cases_lag_1w"],
        "region_classes": ["Colima", "Jalisco"],
        "trees": [
            {"nodes": [
                {"feature": 0, "threshold": 5.0, "left": 1, "right": 2},
                {"value": [3.0]},
                {"value": [30.0]}
            ]},
            {"nodes": [{"value": [10.0]}]}
        ]
    }"#;

    fn classifier() -> ForestClassifier {
        ForestClassifier::new(RandomForest::from_json(CLASSIFIER).unwrap()).unwrap()
    }

    #[test]
    fn classifier_averages_normalised_leaves() {
        // ---
        let m = classifier();
        assert_eq!(m.columns(), &[FeatureColumn::CasesLag1, FeatureColumn::Trend4]);

        // Both trees left: (0.9 + 0.5) / 2, (0.1 + 0.5) / 2
        let p = m.predict_proba(&[3.0, 0.0]);
        assert!((p[0] - 0.7).abs() < 1e-12);
        assert!((p[1] - 0.3).abs() < 1e-12);
        assert_eq!(m.predict(&[3.0, 0.0]), 0);

        // Right then left: (0.2 + 0.5) / 2 = 0.35 vs 0.65
        assert_eq!(m.predict(&[20.0, 0.0]), 1);

        // Right in both
        let p = m.predict_proba(&[80.0, 0.0]);
        assert!((p[1] - 0.9).abs() < 1e-12);
    }

    #[test]
    fn ties_go_to_class_zero() {
        // ---
        let json = r#"{"kind": "classifier", "feature_names": ["month"],
            "trees": [{"nodes": [{"value": [3.0, 3.0]}]}]}"#;
        let m = ForestClassifier::new(RandomForest::from_json(json).unwrap()).unwrap();
        assert_eq!(m.predict(&[1.0]), 0);
    }

    #[test]
    fn regressor_averages_trees_and_reads_region_classes() {
        // ---
        let m = ForestRegressor::new(RandomForest::from_json(REGRESSOR).unwrap()).unwrap();
        assert_eq!(m.predict(&[1.0]), 6.5);
        assert_eq!(m.predict(&[9.0]), 20.0);
        assert_eq!(m.encoder().classes(), &["Colima".to_string(), "Jalisco".to_string()]);
    }

    #[test]
    fn rejects_wrong_kind() {
        // ---
        let err = ForestRegressor::new(RandomForest::from_json(CLASSIFIER).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            ForestError::WrongKind {
                expected: "regressor",
                found: "classifier"
            }
        ));
    }

    #[test]
    fn rejects_unknown_feature_names() {
        // ---
        let json = CLASSIFIER.replace("trend_4w", "lag_4");
        let err = RandomForest::from_json(&json).unwrap_err();
        assert!(matches!(err, ForestError::UnknownFeature(name) if name == "lag_4"));
    }

    #[test]
    fn rejects_structural_defects() {
        // ---
        let backwards = r#"{"kind": "regressor", "feature_names": ["month"],
            "trees": [{"nodes": [{"value": [1.0]}, {"feature": 0, "threshold": 1.0, "left": 0, "right": 0}]}]}"#;
        assert!(matches!(
            RandomForest::from_json(backwards),
            Err(ForestError::Malformed { tree: 0, .. })
        ));

        let bad_feature = r#"{"kind": "regressor", "feature_names": ["month"],
            "trees": [{"nodes": [
                {"feature": 3, "threshold": 1.0, "left": 1, "right": 2},
                {"value": [1.0]}, {"value": [2.0]}]}]}"#;
        assert!(matches!(
            RandomForest::from_json(bad_feature),
            Err(ForestError::Malformed { .. })
        ));

        let bad_leaf = r#"{"kind": "classifier", "feature_names": ["month"],
            "trees": [{"nodes": [{"value": [0.0, 0.0]}]}]}"#;
        assert!(RandomForest::from_json(bad_leaf).is_err());

        let no_trees = r#"{"kind": "regressor", "feature_names": ["month"], "trees": []}"#;
        assert!(RandomForest::from_json(no_trees).is_err());

        assert!(matches!(RandomForest::from_json("{"), Err(ForestError::Json(_))));
    }

    #[test]
    fn missing_artifacts_leave_context_empty() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::Config::for_tests();
        config.classifier_model = dir.path().join("none.json");
        config.regressor_model = dir.path().join("none.json");

        let ctx = ModelContext::load(&config);
        assert!(ctx.classifier.is_none());
        assert!(ctx.regressor.is_none());
        assert!(!ctx.classifier_info().loaded);
    }

    #[test]
    fn loads_artifacts_from_disk() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::Config::for_tests();
        config.classifier_model = dir.path().join("classifier.json");
        config.regressor_model = dir.path().join("regressor.json");
        std::fs::write(&config.classifier_model, CLASSIFIER).unwrap();
        std::fs::write(&config.regressor_model, REGRESSOR).unwrap();

        let ctx = ModelContext::load(&config);
        let info = ctx.classifier_info();
        assert!(info.loaded);
        assert_eq!(info.trees, 2);
        assert_eq!(info.columns, vec!["cases_lag_1w", "trend_4w"]);
        assert_eq!(ctx.regressor_info().trees, 2);
    }
}
