pub mod approvals;
pub mod audit;
pub mod auth;
pub mod certificate;
pub mod config;
pub mod domain;
pub mod errors;
pub mod policy;
pub mod store;
pub mod workflow;

pub use approvals::{derive_overall_status, Decision, DecisionOutcome};
pub use auth::{AuthSession, IdentityProvider, RegistrationInput, TokenSigner, UserProfile};
pub use certificate::{CertificateSnapshot, Document, DocumentRenderer, RenderError};
pub use domain::department::{Department, DepartmentId, DepartmentSummary};
pub use domain::identity::{Identity, Role, RoleKind, User, UserId, UserSummary};
pub use domain::request::{
    ApprovalEntry, ClearanceRequest, EntryStatus, EntryView, OverallStatus, RequestFilter,
    RequestId, RequestView,
};
pub use errors::{ApplicationError, DomainError, ErrorKind, InterfaceError};
pub use policy::{can_access, CollectionOperation, RequestOperation};
pub use store::{DepartmentStore, RequestStore, StoreError, UserStore};
pub use workflow::{CallContext, ClearanceWorkflow, ListFilter};
