//! 設定ファイルのモデル
//!
//! ```yaml
//! budgets:
//!   read: 120
//!   heavy_provisioning:
//!     poll: 3600
//! backoff:
//!   kind: exponential
//!   initial_delay_ms: 500
//!   max_delay_ms: 5000
//!   multiplier: 2.0
//! rate_limit:
//!   interval_ms: 100
//! classifier:
//!   retryable: ["FailedOperation.CdbInstanceLocked"]
//!   not_found: ["FailedOperation.InstanceDeleted"]
//! ```
//!
//! キー名に単位がない期間は秒。すべて省略可能で、省略したキーは
//! エンジンのデフォルト値のまま。

use converge_engine::Backoff;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub budgets: BudgetsFile,
    pub backoff: Option<Backoff>,
    pub rate_limit: Option<RateLimitFile>,
    pub classifier: ClassifierFile,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BudgetsFile {
    pub read: Option<u64>,
    pub lightweight: ProfileFile,
    pub provisioning: ProfileFile,
    pub heavy_provisioning: ProfileFile,
}

/// 操作クラスごとのステージ期限 (秒)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileFile {
    pub submit: Option<u64>,
    pub poll: Option<u64>,
    pub converge: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitFile {
    /// 同じアクションの呼び出し間隔の最小値。0 で無効
    pub interval_ms: u64,
}

/// デフォルトのルール表に追加するエラーコードのパターン
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierFile {
    pub retryable: Vec<String>,
    pub fatal: Vec<String>,
    pub not_found: Vec<String>,
}

impl ConfigFile {
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}
