//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::analytics::SessionAnalytics;
use crate::domain::{Assessment, DifficultyLevel, QuestionType, Turn};
use crate::engine::TurnOutcome;
use crate::logic::Started;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    StartProblem {
        problem: String,
        #[serde(default, rename = "studentId")]
        student_id: Option<String>,
        #[serde(default)]
        profile: Option<serde_json::Value>,
    },
    StudentMessage {
        #[serde(rename = "sessionId")]
        session_id: String,
        text: String,
    },
    Analytics {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Conversation {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    EndSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    SessionStarted {
        #[serde(flatten)]
        session: SessionOut,
    },
    TutorReply {
        #[serde(flatten)]
        turn: TurnOut,
    },
    Analytics {
        analytics: SessionAnalytics,
    },
    Conversation {
        turns: Vec<Turn>,
    },
    SessionEnded {
        analytics: SessionAnalytics,
    },
    Error {
        code: String,
        message: String,
    },
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartIn {
    pub problem: String,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub profile: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOut {
    pub session_id: String,
    pub reply: String,
    pub question_type: QuestionType,
    pub difficulty: DifficultyLevel,
    pub fallback_used: bool,
}

impl From<Started> for SessionOut {
    fn from(s: Started) -> Self {
        Self {
            session_id: s.session_id,
            reply: s.opening.reply,
            question_type: s.opening.question_type,
            difficulty: s.opening.difficulty,
            fallback_used: s.opening.fallback_used,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageIn {
    pub session_id: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOut {
    pub reply: String,
    pub question_type: QuestionType,
    pub is_understanding_check: bool,
    pub depth: u8,
    pub max_depth: u8,
    pub difficulty: DifficultyLevel,
    pub struggling_counter: u32,
    pub assessment: Assessment,
    pub fallback_used: bool,
}

impl From<TurnOutcome> for TurnOut {
    fn from(o: TurnOutcome) -> Self {
        Self {
            reply: o.reply,
            question_type: o.question_type,
            is_understanding_check: o.is_understanding_check,
            depth: o.depth.current_depth,
            max_depth: o.depth.max_depth_reached,
            difficulty: o.difficulty,
            struggling_counter: o.struggling_counter,
            assessment: o.assessment,
            fallback_used: o.fallback_used,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndIn {
    pub session_id: String,
}

#[derive(Serialize)]
pub struct ConversationOut {
    pub turns: Vec<Turn>,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub error: String,
    pub code: String,
}
