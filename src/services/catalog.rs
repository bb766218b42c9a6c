// ABOUTME: Product catalog capability trait - the seam to stack/product sources.
// ABOUTME: Resolves product definitions by id or group and lists upgrade versions.

use async_trait::async_trait;
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};

use crate::types::{ProductGroupId, ProductId, StackId, StackName};
use crate::vars::StackTemplate;

/// One stack as declared by a product manifest. Manifest order is dependency
/// order; the orchestrator never reorders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackManifest {
    pub name: StackName,
    pub display_name: String,
    pub stack_id: StackId,
    /// Version of this stack within the product release.
    pub version: String,
    pub template: StackTemplate,
}

/// A product at one concrete version: the catalog entry a user deploys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDefinition {
    pub id: ProductId,
    /// Stable identity across versions of the same product.
    pub group_id: ProductGroupId,
    pub name: String,
    pub version: String,
    pub stacks: NonEmpty<StackManifest>,
}

impl ProductDefinition {
    pub fn stack(&self, name: &StackName) -> Option<&StackManifest> {
        self.stacks.iter().find(|s| &s.name == name)
    }
}

/// Errors from catalog lookups.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    #[error("malformed catalog entry: {0}")]
    Malformed(String),
}

/// Read access to product and stack definitions.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Resolve a product definition by its versioned id.
    async fn product_by_id(&self, id: &ProductId)
    -> Result<Option<ProductDefinition>, CatalogError>;

    /// Resolve the product definition for a group at a specific version.
    async fn product_for_group(
        &self,
        group: &ProductGroupId,
        version: &str,
    ) -> Result<Option<ProductDefinition>, CatalogError>;

    /// List versions of a group newer than `above`, ascending. Versions that
    /// do not parse as SemVer are included last, unordered - the catalog may
    /// carry non-SemVer entries.
    async fn upgrade_versions(
        &self,
        group: &ProductGroupId,
        above: &str,
    ) -> Result<Vec<String>, CatalogError>;

    /// Resolve a single stack's template at a specific version, for
    /// single-stack upgrades outside a product.
    async fn stack_template(
        &self,
        stack_id: &StackId,
        version: &str,
    ) -> Result<Option<StackTemplate>, CatalogError>;

    /// List versions of a single stack newer than `above`, ascending, with
    /// the same non-SemVer tolerance as `upgrade_versions`.
    async fn stack_versions(
        &self,
        stack_id: &StackId,
        above: &str,
    ) -> Result<Vec<String>, CatalogError>;
}
