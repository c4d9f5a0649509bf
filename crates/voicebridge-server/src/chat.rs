//! Standalone text-chat path for companion clients.
//!
//! Not tied to a live call: a typed `user_message` gets a keyword-matched
//! canned reply plus, where the message implies one, a real dispatch
//! through the function table. The exchange is persisted and broadcast
//! exactly like the live-call path.

use crate::{recorder, AppState};
use serde_json::json;
use std::sync::Arc;

/// Handles one typed message from a companion client.
pub async fn handle_user_message(state: &Arc<AppState>, message: &str, session_id: Option<&str>) {
    tracing::info!(chars = message.len(), "processing companion text message");

    recorder::user_text_message(state, session_id, message).await;

    let reply = generate_reply(message);
    recorder::agent_response(state, session_id, reply).await;

    if let Some((name, parameters)) = implied_function_call(message) {
        let result = match state.functions.dispatch(name, &parameters) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(name = %name, "implied function call failed: {}", e);
                json!({"error": format!("function call failed: {e}")})
            }
        };
        recorder::function_call(state, session_id, name, parameters, result).await;
    }
}

struct Reply {
    keywords: &'static [&'static str],
    text: &'static str,
}

const REPLIES: &[Reply] = &[
    Reply {
        keywords: &["headache", "head pain", "migraine", "head hurt"],
        text: "I understand you're experiencing head pain. This could be caused by tension, \
               dehydration, or stress. I recommend rest, hydration, and if it persists, please \
               consult a healthcare provider. Would you like me to schedule an appointment?",
    },
    Reply {
        keywords: &["dizzy", "dizziness", "lightheaded", "vertigo"],
        text: "Dizziness can have several causes including dehydration, low blood pressure, or \
               inner ear problems. Try sitting or lying down, stay hydrated, and avoid sudden \
               movements. If it is severe or comes with chest pain or difficulty breathing, seek \
               immediate medical attention.",
    },
    Reply {
        keywords: &["sleep", "insomnia", "can't sleep", "cant sleep", "trouble sleeping"],
        text: "Sleep problems are common and can affect your overall health. Keep a regular sleep \
               schedule, avoid caffeine late in the day, and limit screen time before bed. If the \
               problem persists for more than 2 weeks, consider seeing a healthcare provider.",
    },
    Reply {
        keywords: &["fever", "temperature", "chills", "feverish"],
        text: "Fever can indicate your body is fighting an infection. Monitor your temperature, \
               stay hydrated, and get rest. If your fever is over 101\u{b0}F (38.3\u{b0}C) or \
               persists for more than 3 days, please seek medical attention.",
    },
    Reply {
        keywords: &["cough", "throat", "sore throat"],
        text: "A cough can be caused by a cold, flu, or allergies. Try warm liquids and honey, and \
               avoid irritants. If the cough persists for more than 2 weeks or includes blood, \
               please see a healthcare provider.",
    },
    Reply {
        keywords: &["chest pain", "chest hurt", "heart pain"],
        text: "Chest pain can be serious. If you're experiencing severe chest pain, shortness of \
               breath, or pain radiating to your arm or jaw, call 911 immediately. For mild \
               discomfort it could be muscle strain or acid reflux, but get evaluated by a \
               healthcare provider.",
    },
    Reply {
        keywords: &["anxiety", "anxious", "stress", "stressed", "panic"],
        text: "I understand you're feeling anxious. Anxiety is common and treatable. Try deep \
               breathing, regular exercise, and good sleep. If it interferes with daily life, \
               consider speaking with a mental health professional.",
    },
    Reply {
        keywords: &["stomach", "belly", "nausea", "vomit"],
        text: "Stomach discomfort can come from food, stress, or viral infections. Try bland \
               foods, hydration, and rest. If you have severe pain, persistent vomiting, or signs \
               of dehydration, seek medical attention.",
    },
    Reply {
        keywords: &["back pain", "back hurt", "lower back"],
        text: "Back pain often improves with rest, gentle movement, and over-the-counter pain \
               relievers. Apply heat or ice and avoid extended bed rest. If the pain persists or \
               you have numbness or tingling, see a healthcare provider.",
    },
    Reply {
        keywords: &["appointment", "schedule", "book", "see doctor"],
        text: "I can help you schedule an appointment. What type of appointment would you like? A \
               general checkup, follow-up visit, or a specific concern? Please provide your name \
               and preferred time.",
    },
    Reply {
        keywords: &["medication", "medicine", "drug", "pill", "prescription"],
        text: "I can provide information about medications. Which medication would you like to \
               know about? This information is educational only; always consult a healthcare \
               provider or pharmacist about your medications.",
    },
    Reply {
        keywords: &["hello", "hi ", "hey", "good morning", "good afternoon", "good evening"],
        text: "Hello! I'm your care assistant. I can help with symptom assessment, medication \
               information, appointment scheduling, and health tips. I provide general \
               information only and am not a substitute for professional medical advice. How can \
               I help you today?",
    },
];

const DEFAULT_REPLY: &str = "Thank you for your message. I'm here to help with medical questions, \
     symptom assessment, medication information, and appointment scheduling. Could you provide \
     more details about what you'd like assistance with? For emergencies, please call 911.";

/// Picks the canned reply for a message.
pub fn generate_reply(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    REPLIES
        .iter()
        .find(|reply| reply.keywords.iter().any(|k| lower.contains(k)))
        .map(|reply| reply.text)
        .unwrap_or(DEFAULT_REPLY)
}

const SYMPTOM_KEYWORDS: &[&str] = &[
    "headache", "fever", "cough", "pain", "dizzy", "dizziness", "sleep", "anxiety", "stomach",
    "back",
];

/// Derives the function call a message implies, if any. Scheduling wins
/// over symptom assessment, matching how the voice agent prioritizes.
pub fn implied_function_call(message: &str) -> Option<(&'static str, serde_json::Value)> {
    let lower = message.to_lowercase();

    if ["schedule", "appointment", "book"]
        .iter()
        .any(|k| lower.contains(k))
    {
        return Some((
            "schedule_appointment",
            json!({"patient_name": "User", "reason": "general consultation"}),
        ));
    }

    if let Some(symptom) = SYMPTOM_KEYWORDS.iter().find(|k| lower.contains(**k)) {
        return Some(("assess_symptoms", json!({"symptoms": symptom})));
    }

    None
}
