//! Medical lookup handlers: symptom assessment, medication information,
//! appointment scheduling, health tips, and emergency guidance.
//!
//! All data is local and deterministic. Domain misses (unknown medication,
//! unmatched symptoms) are successful executions that return error content,
//! mirroring what the agent service expects to read back to the caller.

use crate::error::FunctionError;
use crate::parse_args;
use crate::registry::FunctionRegistry;
use crate::stores::{AppointmentStore, NewAppointment};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

struct Condition {
    key: &'static str,
    name: &'static str,
    symptoms: &'static [&'static str],
    causes: &'static [&'static str],
    recommendations: &'static [&'static str],
    severity: &'static str,
}

const CONDITIONS: &[Condition] = &[
    Condition {
        key: "headache",
        name: "Headache",
        symptoms: &["head pain", "sensitivity to light", "nausea"],
        causes: &["tension", "dehydration", "stress", "lack of sleep"],
        recommendations: &["rest", "hydration", "pain relief", "stress management"],
        severity: "mild to moderate",
    },
    Condition {
        key: "fever",
        name: "Fever",
        symptoms: &["elevated temperature", "chills", "sweating", "fatigue"],
        causes: &["infection", "inflammation", "heat exhaustion"],
        recommendations: &[
            "rest",
            "fluids",
            "monitor temperature",
            "seek medical care if persistent",
        ],
        severity: "mild to serious",
    },
    Condition {
        key: "cough",
        name: "Cough",
        symptoms: &["persistent coughing", "throat irritation", "mucus production"],
        causes: &["cold", "flu", "allergies", "respiratory infection"],
        recommendations: &["rest", "warm liquids", "honey", "avoid irritants"],
        severity: "mild to moderate",
    },
    Condition {
        key: "chest_pain",
        name: "Chest Pain",
        symptoms: &["chest discomfort", "pressure", "tightness"],
        causes: &["muscle strain", "acid reflux", "anxiety", "heart conditions"],
        recommendations: &[
            "immediate medical attention if severe",
            "rest",
            "monitor symptoms",
        ],
        severity: "mild to emergency",
    },
    Condition {
        key: "stomach_pain",
        name: "Stomach Pain",
        symptoms: &["abdominal discomfort", "cramping", "bloating"],
        causes: &["indigestion", "gas", "food poisoning", "stress"],
        recommendations: &["rest", "bland diet", "hydration", "monitor symptoms"],
        severity: "mild to moderate",
    },
    Condition {
        key: "anxiety",
        name: "Anxiety",
        symptoms: &["worry", "restlessness", "rapid heartbeat", "difficulty concentrating"],
        causes: &["stress", "life changes", "medical conditions", "genetics"],
        recommendations: &[
            "relaxation techniques",
            "exercise",
            "counseling",
            "stress management",
        ],
        severity: "mild to severe",
    },
];

struct Medication {
    key: &'static str,
    name: &'static str,
    uses: &'static [&'static str],
    dosage: &'static str,
    warnings: &'static [&'static str],
    side_effects: &'static [&'static str],
}

const MEDICATIONS: &[Medication] = &[
    Medication {
        key: "acetaminophen",
        name: "Acetaminophen",
        uses: &["pain relief", "fever reduction"],
        dosage: "500-1000mg every 4-6 hours",
        warnings: &["do not exceed 4000mg daily", "avoid alcohol"],
        side_effects: &["rare when used as directed"],
    },
    Medication {
        key: "ibuprofen",
        name: "Ibuprofen",
        uses: &["pain relief", "inflammation", "fever reduction"],
        dosage: "200-400mg every 4-6 hours",
        warnings: &["take with food", "avoid if allergic to NSAIDs"],
        side_effects: &["stomach upset", "drowsiness"],
    },
    Medication {
        key: "aspirin",
        name: "Aspirin",
        uses: &["pain relief", "inflammation", "heart protection"],
        dosage: "81-325mg daily for heart protection",
        warnings: &["avoid in children", "bleeding risk"],
        side_effects: &["stomach irritation", "bleeding"],
    },
];

const GENERAL_ADVICE: &str = "This is general information only. Please consult a healthcare \
     professional for proper diagnosis and treatment.";

/// Registers every medical handler.
pub fn register(registry: &mut FunctionRegistry, appointments: Arc<dyn AppointmentStore>) {
    registry.register("assess_symptoms", assess_symptoms);
    registry.register("get_medication_info", get_medication_info);

    let store = appointments.clone();
    registry.register("schedule_appointment", move |args| {
        schedule_appointment(&*store, args)
    });
    let store = appointments;
    registry.register("check_appointment", move |args| {
        check_appointment(&*store, args)
    });

    registry.register("get_health_tips", get_health_tips);
    registry.register("emergency_guidance", emergency_guidance);
}

#[derive(Deserialize)]
struct AssessSymptomsArgs {
    symptoms: String,
}

fn assess_symptoms(args: &Value) -> Result<Value, FunctionError> {
    let args: AssessSymptomsArgs = parse_args(args)?;
    let symptoms_lower = args.symptoms.to_lowercase();

    let matches: Vec<Value> = CONDITIONS
        .iter()
        .filter(|c| {
            c.symptoms
                .iter()
                .any(|s| symptoms_lower.contains(s) || s.contains(&symptoms_lower))
                || symptoms_lower.contains(c.key)
        })
        .map(|c| {
            json!({
                "condition": c.name,
                "symptoms": c.symptoms,
                "causes": c.causes,
                "recommendations": c.recommendations,
                "severity": c.severity,
            })
        })
        .collect();

    if matches.is_empty() {
        return Ok(json!({
            "patient_symptoms": args.symptoms,
            "message": "Unable to match symptoms to common conditions. Please consult a healthcare professional.",
            "advice": "It's always best to speak with a medical professional about any health concerns.",
        }));
    }

    Ok(json!({
        "patient_symptoms": args.symptoms,
        "possible_conditions": matches,
        "general_advice": GENERAL_ADVICE,
        "emergency_note": "Seek immediate medical attention if symptoms are severe or worsening.",
    }))
}

#[derive(Deserialize)]
struct MedicationInfoArgs {
    medication_name: String,
}

fn get_medication_info(args: &Value) -> Result<Value, FunctionError> {
    let args: MedicationInfoArgs = parse_args(args)?;
    let key = args.medication_name.to_lowercase();

    match MEDICATIONS.iter().find(|m| m.key == key) {
        Some(m) => Ok(json!({
            "medication": m.name,
            "uses": m.uses,
            "dosage": m.dosage,
            "warnings": m.warnings,
            "side_effects": m.side_effects,
            "note": "This information is for educational purposes only. Always consult a \
                     healthcare provider before taking any medication.",
        })),
        None => Ok(json!({
            "error": format!("Medication '{}' not found in database", args.medication_name),
            "advice": "Please consult a pharmacist or healthcare provider for medication information.",
        })),
    }
}

#[derive(Deserialize)]
struct ScheduleAppointmentArgs {
    patient_name: String,
    reason: String,
    #[serde(default)]
    preferred_date: Option<String>,
}

fn schedule_appointment(
    store: &dyn AppointmentStore,
    args: &Value,
) -> Result<Value, FunctionError> {
    let args: ScheduleAppointmentArgs = parse_args(args)?;

    let date = args.preferred_date.unwrap_or_else(|| {
        (Utc::now() + Duration::days(1))
            .format("%Y-%m-%d 10:00 AM")
            .to_string()
    });

    let appointment = store.create(NewAppointment {
        patient_name: args.patient_name,
        reason: args.reason,
        date,
    });

    Ok(json!({
        "appointment_id": appointment.id,
        "message": format!("Appointment scheduled for {}", appointment.patient_name),
        "date": appointment.date,
        "reason": appointment.reason,
        "status": appointment.status,
        "note": "Please arrive 15 minutes early for check-in.",
    }))
}

#[derive(Deserialize)]
struct CheckAppointmentArgs {
    appointment_id: String,
}

fn check_appointment(store: &dyn AppointmentStore, args: &Value) -> Result<Value, FunctionError> {
    let args: CheckAppointmentArgs = parse_args(args)?;

    let appointment = args
        .appointment_id
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|id| store.get(id));

    match appointment {
        Some(a) => Ok(json!({
            "appointment_id": a.id,
            "patient_name": a.patient_name,
            "reason": a.reason,
            "date": a.date,
            "status": a.status,
        })),
        None => Ok(json!({
            "error": format!("Appointment {} not found", args.appointment_id),
        })),
    }
}

const HEALTH_TIPS: &[(&str, &[&str])] = &[
    (
        "general",
        &[
            "Stay hydrated by drinking 8 glasses of water daily",
            "Get 7-9 hours of sleep each night",
            "Exercise for at least 30 minutes, 5 days a week",
            "Eat a balanced diet with fruits and vegetables",
            "Practice stress management techniques",
        ],
    ),
    (
        "nutrition",
        &[
            "Include colorful fruits and vegetables in every meal",
            "Choose whole grains over refined grains",
            "Limit processed foods and added sugars",
            "Include lean proteins like fish, chicken, and legumes",
            "Practice portion control",
        ],
    ),
    (
        "exercise",
        &[
            "Start with 10-15 minutes of daily activity if you're new to exercise",
            "Include both cardio and strength training",
            "Take breaks from sitting every hour",
            "Try activities you enjoy to stay motivated",
            "Warm up before and cool down after exercise",
        ],
    ),
    (
        "mental_health",
        &[
            "Practice mindfulness or meditation daily",
            "Maintain social connections",
            "Set realistic goals and celebrate achievements",
            "Take breaks from technology and social media",
            "Seek professional help when needed",
        ],
    ),
];

#[derive(Deserialize)]
struct HealthTipsArgs {
    #[serde(default)]
    category: Option<String>,
}

fn get_health_tips(args: &Value) -> Result<Value, FunctionError> {
    let args: HealthTipsArgs = parse_args(args)?;
    let category = args.category.unwrap_or_else(|| "general".to_string());
    let key = category.to_lowercase();

    let tips = HEALTH_TIPS
        .iter()
        .find(|(name, _)| *name == key)
        .or_else(|| HEALTH_TIPS.first())
        .map(|(_, tips)| *tips)
        .unwrap_or(&[]);

    Ok(json!({
        "category": category,
        "tips": tips,
        "note": "These are general wellness suggestions. Consult healthcare providers for \
                 personalized advice.",
    }))
}

const EMERGENCIES: &[(&str, &[&str], &str)] = &[
    (
        "chest_pain",
        &[
            "Call 911 immediately",
            "Sit down and rest",
            "Chew aspirin if not allergic",
        ],
        "Chest pain can be a sign of heart attack - seek immediate medical attention",
    ),
    (
        "difficulty_breathing",
        &[
            "Call 911",
            "Sit upright",
            "Loosen tight clothing",
            "Use prescribed inhaler if available",
        ],
        "Difficulty breathing requires immediate medical attention",
    ),
    (
        "severe_bleeding",
        &[
            "Apply direct pressure to wound",
            "Elevate injured area above heart",
            "Call 911",
        ],
        "Severe bleeding can be life-threatening",
    ),
    (
        "poisoning",
        &[
            "Call Poison Control: 1-800-222-1222",
            "Do not induce vomiting unless instructed",
        ],
        "Call poison control immediately for any suspected poisoning",
    ),
    (
        "allergic_reaction",
        &["Use EpiPen if available", "Call 911", "Monitor breathing"],
        "Severe allergic reactions can be life-threatening",
    ),
];

#[derive(Deserialize)]
struct EmergencyGuidanceArgs {
    emergency_type: String,
}

fn emergency_guidance(args: &Value) -> Result<Value, FunctionError> {
    let args: EmergencyGuidanceArgs = parse_args(args)?;
    let key = args.emergency_type.to_lowercase();

    match EMERGENCIES.iter().find(|(name, _, _)| *name == key) {
        Some((_, actions, warning)) => Ok(json!({
            "emergency_type": args.emergency_type,
            "immediate_actions": actions,
            "warning": warning,
            "emergency_number": "911",
            "poison_control": "1-800-222-1222",
        })),
        None => Ok(json!({
            "emergency_type": args.emergency_type,
            "general_guidance": "Call 911 for any life-threatening emergency",
            "message": "When in doubt, seek immediate medical attention",
        })),
    }
}
