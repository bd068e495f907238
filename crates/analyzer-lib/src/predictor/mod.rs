//! Feature engineering and trend forecasting

mod features;
mod forecaster;
mod forest;
mod linear;

pub use features::{daily_rollup, linear_regression_slope, FeatureBuilder, LONG_WINDOW, SHORT_WINDOW};
pub use forecaster::{
    classify_trend, normal_quantile, TrainedModel, TrendForecaster, FEATURE_NAMES, RANDOM_FOREST,
    RIDGE,
};
pub use forest::{ForestParams, RandomForest};
pub use linear::RidgeRegression;
