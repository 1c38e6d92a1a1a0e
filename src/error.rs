use thiserror::Error;

/// Rejections raised while creating a milestone goal from user input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GoalError {
    #[error("invalid goal condition {0:?}: enter a goal like \"> 3.4\"")]
    InvalidCondition(String),
    #[error("unknown month format {0:?}: use \"May 2026\", \"05/2026\" or \"2026/05\"")]
    UnknownMonthFormat(String),
    #[error("no milestone survey set at index {0}")]
    UnknownSurveySet(usize),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SelectorError {
    #[error("malformed selector id {0:?}")]
    Malformed(String),
    #[error("no survey set at index {0}")]
    UnknownSet(usize),
    #[error("survey set {set} has no question at index {question}")]
    UnknownQuestion { set: usize, question: usize },
    #[error("no survey set belongs to sub-construct ({0})")]
    UnknownSubConstruct(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvertError {
    #[error("select at least one question column and give it a question label")]
    NoQuestionColumns,
    #[error("a target organization id is required (e.g. org1)")]
    MissingOrganization,
    #[error("a target file name is required")]
    MissingFileName,
    #[error("column {0} is outside the source table")]
    ColumnOutOfRange(usize),
    #[error("row {0} is outside the source table")]
    RowOutOfRange(usize),
}
