use crate::error::{Error, Result};
use crate::models::automation_job::ActionType;

text_enum!(
    /// Position of a candidate in the hiring funnel.
    PipelineStage {
        New => "new",
        Analyzed => "analyzed",
        OutreachSent => "outreach_sent",
        OutreachDeclined => "outreach_declined",
        QuestionnaireSent => "questionnaire_sent",
        QuestionnaireDone => "questionnaire_done",
        TestSent => "test_sent",
        TestDone => "test_done",
        Interview => "interview",
        Rejected => "rejected",
        Hired => "hired",
    }
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineEvent {
    AnalysisCompleted,
    OutreachSent,
    OutreachDeclined,
    QuestionnaireSent,
    QuestionnaireCompleted,
    TestTaskSent,
    TestTaskSubmitted,
    Invited,
    Rejected,
    Hired,
}

use PipelineEvent as Ev;
use PipelineStage as St;

/// `(event, stages the event is accepted from, resulting stage)`.
/// `Rejected` is accepted from every non-terminal stage and is handled
/// separately in [`PipelineStage::apply`].
const TRANSITIONS: &[(PipelineEvent, &[PipelineStage], PipelineStage)] = &[
    (Ev::AnalysisCompleted, &[St::New, St::Analyzed], St::Analyzed),
    (Ev::OutreachSent, &[St::Analyzed], St::OutreachSent),
    (Ev::OutreachDeclined, &[St::OutreachSent], St::OutreachDeclined),
    (
        Ev::QuestionnaireSent,
        &[St::Analyzed, St::OutreachSent],
        St::QuestionnaireSent,
    ),
    (
        Ev::QuestionnaireCompleted,
        &[St::QuestionnaireSent],
        St::QuestionnaireDone,
    ),
    (
        Ev::TestTaskSent,
        &[
            St::Analyzed,
            St::OutreachSent,
            St::QuestionnaireSent,
            St::QuestionnaireDone,
        ],
        St::TestSent,
    ),
    (Ev::TestTaskSubmitted, &[St::TestSent], St::TestDone),
    (
        Ev::Invited,
        &[
            St::Analyzed,
            St::OutreachSent,
            St::QuestionnaireDone,
            St::TestSent,
            St::TestDone,
        ],
        St::Interview,
    ),
    (Ev::Hired, &[St::Interview], St::Hired),
];

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, St::Rejected | St::Hired)
    }

    /// Next stage for `event`, or `None` when the table has no such edge.
    pub fn next(&self, event: PipelineEvent) -> Option<PipelineStage> {
        if self.is_terminal() {
            return None;
        }
        if event == Ev::Rejected {
            return Some(St::Rejected);
        }
        TRANSITIONS
            .iter()
            .find(|(ev, from, _)| *ev == event && from.contains(self))
            .map(|(_, _, to)| *to)
    }

    pub fn apply(&self, event: PipelineEvent) -> Result<PipelineStage> {
        self.next(event).ok_or(Error::InvalidTransition { from: *self, event })
    }

    pub fn allows(&self, action: ActionType) -> bool {
        self.next(action.pipeline_event()).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_from_new_is_rejected() {
        let err = St::New.apply(Ev::Invited).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: St::New,
                event: Ev::Invited
            }
        ));
        assert!(!St::New.allows(ActionType::SendInvite));
    }

    #[test]
    fn happy_path_reaches_hired() {
        let stage = St::New
            .apply(Ev::AnalysisCompleted)
            .and_then(|s| s.apply(Ev::OutreachSent))
            .and_then(|s| s.apply(Ev::QuestionnaireSent))
            .and_then(|s| s.apply(Ev::QuestionnaireCompleted))
            .and_then(|s| s.apply(Ev::TestTaskSent))
            .and_then(|s| s.apply(Ev::TestTaskSubmitted))
            .and_then(|s| s.apply(Ev::Invited))
            .and_then(|s| s.apply(Ev::Hired))
            .unwrap();
        assert_eq!(stage, St::Hired);
    }

    #[test]
    fn terminal_stages_accept_nothing() {
        for stage in [St::Rejected, St::Hired] {
            assert!(!ActionType::ALL.iter().any(|a| stage.allows(*a)));
            assert!(stage.next(Ev::Rejected).is_none());
        }
    }

    #[test]
    fn rejection_allowed_from_any_open_stage() {
        for stage in St::ALL.iter().filter(|s| !s.is_terminal()) {
            assert_eq!(stage.next(Ev::Rejected), Some(St::Rejected));
        }
    }

    #[test]
    fn actions_accepted_after_outreach() {
        let stage = St::OutreachSent;
        assert!(stage.allows(ActionType::SendQuestionnaire));
        assert!(stage.allows(ActionType::SendTestTask));
        assert!(stage.allows(ActionType::SendInvite));
        assert!(stage.allows(ActionType::SendRejection));
        assert!(!stage.allows(ActionType::SendOutreach));
    }

    #[test]
    fn stage_text_round_trips() {
        assert_eq!("test_sent".parse::<PipelineStage>().unwrap(), St::TestSent);
        assert!("archived".parse::<PipelineStage>().is_err());
    }
}
