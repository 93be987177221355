// Purpose: Lowering contract layer between semantic facts and the IR emitter.
// Inputs/Outputs: Normalizes the raw dispatch contract and derives one feature contract per lowering area.
// Invariants: Replay keys are pure functions of declared fields in declared order; catalog order is fixed.
// Gotchas: The emitter trusts these contracts, so an inconsistent entry must be rejected here, not later.

pub mod build;
pub mod contract;
pub mod features;

pub use build::{ContractInputs, DiagnosticCounts, build_contracts, interface_digest};
pub use contract::{LoweringBoundary, LoweringContract, LoweringContractError, normalize};
pub use features::{FeatureContract, FieldValue, LoweringContracts};
