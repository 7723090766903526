use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::department::{Department, DepartmentId};
use crate::domain::identity::UserId;
use crate::domain::request::{
    ApprovalEntry, ClearanceRequest, EntryStatus, OverallStatus, RequestId,
};
use crate::errors::DomainError;

/// A staff member's verdict for their department's entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Decision {
    Approved { comment: String },
    Rejected { comment: String },
}

impl Decision {
    /// Validates raw decision input. Rejections must carry a non-blank comment.
    pub fn parse(status: &str, comment: Option<&str>) -> Result<Self, DomainError> {
        let comment = comment.map(str::trim).unwrap_or_default().to_owned();
        match EntryStatus::parse(status) {
            Some(EntryStatus::Approved) => Ok(Self::Approved { comment }),
            Some(EntryStatus::Rejected) if comment.is_empty() => {
                Err(DomainError::MissingRejectionComment)
            }
            Some(EntryStatus::Rejected) => Ok(Self::Rejected { comment }),
            Some(EntryStatus::Pending) | None => {
                Err(DomainError::InvalidDecision(status.trim().to_owned()))
            }
        }
    }

    pub fn status(&self) -> EntryStatus {
        match self {
            Self::Approved { .. } => EntryStatus::Approved,
            Self::Rejected { .. } => EntryStatus::Rejected,
        }
    }

    pub fn comment(&self) -> &str {
        match self {
            Self::Approved { comment } | Self::Rejected { comment } => comment,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub department_id: DepartmentId,
    pub entry_status: EntryStatus,
    pub from: OverallStatus,
    pub to: OverallStatus,
}

impl DecisionOutcome {
    pub fn finalized(&self) -> bool {
        self.to.is_terminal()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct StatusTally {
    total: usize,
    approved: usize,
    rejected: usize,
}

impl StatusTally {
    fn record(mut self, status: EntryStatus) -> Self {
        self.total += 1;
        match status {
            EntryStatus::Approved => self.approved += 1,
            EntryStatus::Rejected => self.rejected += 1,
            EntryStatus::Pending => {}
        }
        self
    }
}

/// Derives the overall status from the entry set. Counts are order independent,
/// so any permutation of the same entries yields the same status.
pub fn derive_overall_status(entries: &[ApprovalEntry]) -> OverallStatus {
    let tally =
        entries.iter().fold(StatusTally::default(), |tally, entry| tally.record(entry.status));

    if tally.rejected > 0 {
        OverallStatus::Rejected
    } else if tally.total > 0 && tally.approved == tally.total {
        OverallStatus::Approved
    } else if tally.approved > 0 {
        OverallStatus::InProgress
    } else {
        OverallStatus::Pending
    }
}

impl ClearanceRequest {
    /// Opens a request with one pending entry per department in `departments`.
    /// The set is fixed here; departments registered later never attach.
    pub fn open(
        student_id: UserId,
        departments: &[Department],
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if departments.is_empty() {
            return Err(DomainError::NoDepartments);
        }

        let mut entries: Vec<ApprovalEntry> = Vec::with_capacity(departments.len());
        for department in departments {
            if entries.iter().any(|entry| entry.department_id == department.id) {
                return Err(DomainError::InvariantViolation(format!(
                    "department `{}` listed twice",
                    department.id
                )));
            }
            entries.push(ApprovalEntry::pending(department.id.clone()));
        }

        Ok(Self {
            id: RequestId::generate(),
            student_id,
            overall_status: derive_overall_status(&entries),
            entries,
            final_approval_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// Applies one department decision and recomputes the overall status in the
    /// same step. Nothing is mutated when a check fails.
    pub fn record_decision(
        &mut self,
        department_id: &DepartmentId,
        decided_by: &UserId,
        decision: &Decision,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, DomainError> {
        if self.overall_status.is_terminal() {
            return Err(DomainError::AlreadyFinalized { status: self.overall_status });
        }

        let entry = self
            .entries
            .iter_mut()
            .find(|entry| &entry.department_id == department_id)
            .ok_or_else(|| DomainError::DepartmentNotParty {
                department_id: department_id.clone(),
            })?;

        if entry.status != EntryStatus::Pending {
            return Err(DomainError::AlreadyProcessed {
                department_id: department_id.clone(),
                status: entry.status,
            });
        }

        entry.status = decision.status();
        entry.comment = decision.comment().to_owned();
        entry.approved_by = Some(decided_by.clone());
        entry.decided_at = Some(now);

        let from = self.overall_status;
        self.refresh_overall_status(now);

        Ok(DecisionOutcome {
            department_id: department_id.clone(),
            entry_status: decision.status(),
            from,
            to: self.overall_status,
        })
    }

    /// Re-derives `overall_status` from the entries. `final_approval_at` is
    /// stamped the first time the request becomes approved and kept afterwards.
    pub fn refresh_overall_status(&mut self, now: DateTime<Utc>) {
        self.overall_status = derive_overall_status(&self.entries);
        if self.overall_status == OverallStatus::Approved && self.final_approval_at.is_none() {
            self.final_approval_at = Some(now);
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{derive_overall_status, Decision};
    use crate::domain::department::{Department, DepartmentId};
    use crate::domain::identity::UserId;
    use crate::domain::request::{
        ApprovalEntry, ClearanceRequest, EntryStatus, OverallStatus,
    };
    use crate::errors::DomainError;

    fn departments(names: &[&str]) -> Vec<Department> {
        let created_at = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        names
            .iter()
            .map(|name| Department {
                id: DepartmentId(format!("dept-{}", name.to_ascii_lowercase())),
                name: (*name).to_string(),
                created_by: UserId("admin-1".to_string()),
                created_at,
            })
            .collect()
    }

    fn open_request() -> ClearanceRequest {
        let opened_at = Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap();
        ClearanceRequest::open(
            UserId("student-1".to_string()),
            &departments(&["Library", "Accounts", "Hostel"]),
            opened_at,
        )
        .expect("request should open")
    }

    fn entry(department: &str, status: EntryStatus) -> ApprovalEntry {
        ApprovalEntry { status, ..ApprovalEntry::pending(DepartmentId(department.to_string())) }
    }

    fn approve() -> Decision {
        Decision::Approved { comment: String::new() }
    }

    fn staff() -> UserId {
        UserId("staff-1".to_string())
    }

    #[test]
    fn open_snapshots_every_department_as_pending() {
        let request = open_request();

        assert_eq!(request.entries.len(), 3);
        assert!(request.entries.iter().all(|entry| entry.status == EntryStatus::Pending));
        assert_eq!(request.overall_status, OverallStatus::Pending);
        assert!(request.final_approval_at.is_none());
        assert_eq!(request.version, 0);
    }

    #[test]
    fn open_fails_without_departments() {
        let error = ClearanceRequest::open(UserId("student-1".to_string()), &[], Utc::now())
            .expect_err("empty registry should fail");

        assert_eq!(error, DomainError::NoDepartments);
    }

    #[test]
    fn decision_parse_requires_comment_for_rejection() {
        assert_eq!(
            Decision::parse("rejected", Some("   ")),
            Err(DomainError::MissingRejectionComment)
        );
        assert_eq!(Decision::parse("rejected", None), Err(DomainError::MissingRejectionComment));
        assert_eq!(
            Decision::parse("Rejected", Some(" missing equipment ")),
            Ok(Decision::Rejected { comment: "missing equipment".to_string() })
        );
        assert_eq!(
            Decision::parse("approved", None),
            Ok(Decision::Approved { comment: String::new() })
        );
    }

    #[test]
    fn decision_parse_rejects_unknown_or_pending_status() {
        assert!(matches!(Decision::parse("pending", None), Err(DomainError::InvalidDecision(_))));
        assert!(matches!(Decision::parse("maybe", None), Err(DomainError::InvalidDecision(_))));
    }

    #[test]
    fn derive_status_covers_each_rule() {
        assert_eq!(derive_overall_status(&[]), OverallStatus::Pending);
        assert_eq!(
            derive_overall_status(&[entry("a", EntryStatus::Pending), entry("b", EntryStatus::Pending)]),
            OverallStatus::Pending
        );
        assert_eq!(
            derive_overall_status(&[entry("a", EntryStatus::Approved), entry("b", EntryStatus::Pending)]),
            OverallStatus::InProgress
        );
        assert_eq!(
            derive_overall_status(&[entry("a", EntryStatus::Approved), entry("b", EntryStatus::Approved)]),
            OverallStatus::Approved
        );
        assert_eq!(
            derive_overall_status(&[entry("a", EntryStatus::Approved), entry("b", EntryStatus::Rejected)]),
            OverallStatus::Rejected
        );
    }

    #[test]
    fn rejection_wins_regardless_of_position() {
        let statuses = [EntryStatus::Approved, EntryStatus::Pending, EntryStatus::Rejected];
        for rejected_at in 0..statuses.len() {
            let mut entries: Vec<ApprovalEntry> = (0..3)
                .map(|index| entry(&format!("d{index}"), statuses[(index + 1) % 2]))
                .collect();
            entries[rejected_at].status = EntryStatus::Rejected;

            assert_eq!(derive_overall_status(&entries), OverallStatus::Rejected);
        }
    }

    #[test]
    fn derived_status_is_independent_of_entry_order() {
        let base = vec![
            entry("a", EntryStatus::Approved),
            entry("b", EntryStatus::Pending),
            entry("c", EntryStatus::Approved),
        ];
        let expected = derive_overall_status(&base);
        let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

        for order in orders {
            let permuted: Vec<ApprovalEntry> = order.iter().map(|&i| base[i].clone()).collect();
            assert_eq!(derive_overall_status(&permuted), expected);
        }
        assert_eq!(expected, OverallStatus::InProgress);
    }

    #[test]
    fn decision_order_does_not_change_final_status() {
        let orders = [[0, 1, 2], [2, 1, 0], [1, 2, 0]];
        for order in orders {
            let mut request = open_request();
            let department_ids: Vec<DepartmentId> =
                request.entries.iter().map(|entry| entry.department_id.clone()).collect();
            let now = Utc::now();
            for index in order {
                request
                    .record_decision(&department_ids[index], &staff(), &approve(), now)
                    .expect("decision should apply");
            }
            assert_eq!(request.overall_status, OverallStatus::Approved);
        }
    }

    #[test]
    fn first_approval_moves_request_in_progress() {
        let mut request = open_request();
        let library = DepartmentId("dept-library".to_string());

        let outcome = request
            .record_decision(&library, &staff(), &approve(), Utc::now())
            .expect("approval should apply");

        assert_eq!(outcome.from, OverallStatus::Pending);
        assert_eq!(outcome.to, OverallStatus::InProgress);
        assert!(!outcome.finalized());
        let entry = request.entry_for(&library).expect("entry");
        assert_eq!(entry.status, EntryStatus::Approved);
        assert_eq!(entry.approved_by, Some(staff()));
        assert!(entry.decided_at.is_some());
    }

    #[test]
    fn last_approval_finalizes_and_stamps_final_approval_once() {
        let mut request = open_request();
        let start = Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap();
        let ids: Vec<DepartmentId> =
            request.entries.iter().map(|entry| entry.department_id.clone()).collect();

        for (offset, id) in ids.iter().enumerate() {
            request
                .record_decision(id, &staff(), &approve(), start + Duration::hours(offset as i64))
                .expect("approval should apply");
        }

        let stamped = start + Duration::hours(2);
        assert_eq!(request.overall_status, OverallStatus::Approved);
        assert_eq!(request.final_approval_at, Some(stamped));

        request.refresh_overall_status(start + Duration::days(3));
        assert_eq!(request.final_approval_at, Some(stamped));
    }

    #[test]
    fn rejection_finalizes_immediately_and_blocks_pending_departments() {
        let mut request = open_request();
        let library = DepartmentId("dept-library".to_string());
        let accounts = DepartmentId("dept-accounts".to_string());
        let hostel = DepartmentId("dept-hostel".to_string());

        request.record_decision(&library, &staff(), &approve(), Utc::now()).expect("approve");
        let outcome = request
            .record_decision(
                &accounts,
                &staff(),
                &Decision::Rejected { comment: "missing equipment".to_string() },
                Utc::now(),
            )
            .expect("reject");
        assert_eq!(outcome.to, OverallStatus::Rejected);
        assert!(outcome.finalized());

        let before = request.clone();
        let error = request
            .record_decision(&hostel, &staff(), &approve(), Utc::now())
            .expect_err("finalized request should refuse decisions");
        assert_eq!(error, DomainError::AlreadyFinalized { status: OverallStatus::Rejected });
        assert_eq!(request, before);
    }

    #[test]
    fn second_decision_for_same_department_conflicts() {
        let mut request = open_request();
        let library = DepartmentId("dept-library".to_string());

        request.record_decision(&library, &staff(), &approve(), Utc::now()).expect("first");
        let before = request.clone();
        let error = request
            .record_decision(&library, &staff(), &approve(), Utc::now())
            .expect_err("second decision should conflict");

        assert_eq!(
            error,
            DomainError::AlreadyProcessed { department_id: library, status: EntryStatus::Approved }
        );
        assert_eq!(request, before);
    }

    #[test]
    fn department_outside_snapshot_is_refused() {
        let mut request = open_request();
        let sports = DepartmentId("dept-sports".to_string());

        let error = request
            .record_decision(&sports, &staff(), &approve(), Utc::now())
            .expect_err("unknown department");

        assert_eq!(error, DomainError::DepartmentNotParty { department_id: sports });
        assert_eq!(request.overall_status, OverallStatus::Pending);
    }
}
