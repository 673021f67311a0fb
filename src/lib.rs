//! Circular mean-absolute-error engine for RNA backbone torsion angles.
//!
//! Two angle sources for the same RNA (geometry extracted from a structure,
//! or angles predicted from sequence) are compared per angle name with a
//! periodic distance, positions undefined on either side are skipped, and the
//! per-angle errors are averaged into the RNA-Torsion-A score.

mod aggregate;
mod angles;
mod collection;
mod mae;
mod reduce;

pub use aggregate::{aggregate, compare_vectors, score_entity, EntityMae, EntityScore};
pub use angles::{
    is_missing_token, AngleError, AngleName, AngleValue, AngleVector, CANONICAL_ANGLES,
    MISSING_TOKENS, MISSING_TOKEN_OUT,
};
pub use collection::{
    json_path, read_collection, to_json_value, write_collection, CollectionError, CollectionLoad,
    EntityCollection,
};
pub use mae::{circular_distance, circular_mae, AngleMae, MaeMissingReason, ScoreError};
pub use reduce::reduce_mean;
