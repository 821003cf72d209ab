//! Test plan construction for QTI delivery.
//!
//! [`TestPlanner`] turns an [`qti_core::AssessmentTest`] into a [`TestPlan`]
//! for one attempt: sections resolve their selection and ordering, item
//! references resolve through an [`ItemResolver`], and every instance gets
//! a unique [`TestPlanNodeKey`] and a cascaded
//! [`EffectiveItemSessionControl`].

pub mod control;
pub mod error;
pub mod key;
pub mod plan;
pub mod planner;
pub mod selection;

pub use control::{ControlResolver, EffectiveItemSessionControl};
pub use error::PlanError;
pub use key::TestPlanNodeKey;
pub use plan::{NodeIndex, TestPlan, TestPlanNode};
pub use planner::{IdentityResolver, ItemResolver, TestPlanner};
