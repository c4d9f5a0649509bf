//! Pharmacy lookup handlers: drug information, ordering, interaction and
//! alternative checks, and prescription status.

use crate::error::FunctionError;
use crate::parse_args;
use crate::registry::FunctionRegistry;
use crate::stores::{NewOrder, OrderStore};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

struct Drug {
    key: &'static str,
    name: &'static str,
    price: f64,
    description: &'static str,
    quantity: u32,
}

const DRUGS: &[Drug] = &[
    Drug {
        key: "aspirin",
        name: "Acetylsalicylic Acid",
        price: 5.99,
        description: "Non-steroidal anti-inflammatory drug for pain relief and fever reduction",
        quantity: 30,
    },
    Drug {
        key: "ibuprofen",
        name: "Ibuprofen",
        price: 7.99,
        description: "Anti-inflammatory medication for pain and inflammation management",
        quantity: 20,
    },
    Drug {
        key: "acetaminophen",
        name: "Acetaminophen",
        price: 6.99,
        description: "Analgesic and antipyretic medication for pain and fever control",
        quantity: 25,
    },
    Drug {
        key: "metformin",
        name: "Metformin Hydrochloride",
        price: 12.50,
        description: "Biguanide antidiabetic medication for type 2 diabetes management",
        quantity: 60,
    },
    Drug {
        key: "lisinopril",
        name: "Lisinopril",
        price: 8.75,
        description: "ACE inhibitor for hypertension and heart failure treatment",
        quantity: 30,
    },
    Drug {
        key: "atorvastatin",
        name: "Atorvastatin Calcium",
        price: 15.25,
        description: "HMG-CoA reductase inhibitor for cholesterol management",
        quantity: 30,
    },
    Drug {
        key: "omeprazole",
        name: "Omeprazole",
        price: 11.99,
        description: "Proton pump inhibitor for acid reflux and ulcer treatment",
        quantity: 28,
    },
    Drug {
        key: "sertraline",
        name: "Sertraline Hydrochloride",
        price: 13.75,
        description: "Selective serotonin reuptake inhibitor for depression and anxiety",
        quantity: 30,
    },
];

const INTERACTIONS: &[(&str, &str, &str)] = &[
    ("warfarin", "aspirin", "Increased bleeding risk"),
    ("metformin", "alcohol", "Risk of lactic acidosis"),
    ("lisinopril", "potassium", "Risk of hyperkalemia"),
    ("atorvastatin", "grapefruit", "Increased statin levels"),
    ("sertraline", "tramadol", "Risk of serotonin syndrome"),
];

const ALTERNATIVES: &[(&str, &[&str])] = &[
    ("aspirin", &["ibuprofen", "acetaminophen", "naproxen"]),
    ("ibuprofen", &["aspirin", "acetaminophen", "naproxen"]),
    ("metformin", &["glipizide", "pioglitazone", "insulin"]),
    ("lisinopril", &["losartan", "amlodipine", "metoprolol"]),
    ("atorvastatin", &["simvastatin", "rosuvastatin", "pravastatin"]),
    ("sertraline", &["fluoxetine", "paroxetine", "citalopram"]),
];

const PRESCRIPTIONS: &[(&str, &str, &str, &str, &str, &str)] = &[
    ("RX001", "ready", "John Doe", "Metformin", "pickup_time", "2026-01-15 14:30"),
    ("RX002", "processing", "Jane Smith", "Lisinopril", "estimated_ready", "2026-01-15 16:00"),
    ("RX003", "expired", "Bob Johnson", "Atorvastatin", "expiry_date", "2026-01-10"),
];

fn find_drug(name: &str) -> Option<&'static Drug> {
    let key = name.to_lowercase();
    DRUGS.iter().find(|d| d.key == key)
}

/// Registers every pharmacy handler.
pub fn register(registry: &mut FunctionRegistry, orders: Arc<dyn OrderStore>) {
    registry.register("get_drug_info", get_drug_info);

    let store = orders.clone();
    registry.register("place_order", move |args| place_order(&*store, args));
    let store = orders;
    registry.register("lookup_order", move |args| lookup_order(&*store, args));

    registry.register("check_drug_interactions", check_drug_interactions);
    registry.register("get_drug_alternatives", get_drug_alternatives);
    registry.register("check_prescription_status", check_prescription_status);
}

#[derive(Deserialize)]
struct DrugInfoArgs {
    drug_name: String,
}

fn get_drug_info(args: &Value) -> Result<Value, FunctionError> {
    let args: DrugInfoArgs = parse_args(args)?;

    match find_drug(&args.drug_name) {
        Some(drug) => Ok(json!({
            "name": drug.name,
            "description": drug.description,
            "price": drug.price,
            "quantity": drug.quantity,
            "source": "local",
        })),
        None => Ok(json!({
            "error": format!("Drug '{}' not found in local inventory", args.drug_name),
        })),
    }
}

#[derive(Deserialize)]
struct PlaceOrderArgs {
    customer_name: String,
    drug_name: String,
}

fn place_order(store: &dyn OrderStore, args: &Value) -> Result<Value, FunctionError> {
    let args: PlaceOrderArgs = parse_args(args)?;

    let Some(drug) = find_drug(&args.drug_name) else {
        return Ok(json!({
            "error": format!("Drug '{}' not found", args.drug_name),
        }));
    };

    let order = store.create(NewOrder {
        customer: args.customer_name,
        drug: drug.name.to_string(),
        quantity: drug.quantity,
        total: drug.price,
    });

    Ok(json!({
        "order_id": order.id,
        "message": format!(
            "Order {} placed: {} {} for ${:.2}",
            order.id, order.quantity, order.drug, order.total
        ),
        "total": order.total,
        "quantity": order.quantity,
    }))
}

#[derive(Deserialize)]
struct LookupOrderArgs {
    order_id: Value,
}

fn lookup_order(store: &dyn OrderStore, args: &Value) -> Result<Value, FunctionError> {
    let args: LookupOrderArgs = parse_args(args)?;

    // Order ids arrive as numbers or digit strings depending on the agent.
    let id = match &args.order_id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    match id.and_then(|id| store.get(id)) {
        Some(order) => Ok(json!({
            "order_id": order.id,
            "customer": order.customer,
            "drug": order.drug,
            "quantity": order.quantity,
            "total": order.total,
            "status": order.status,
        })),
        None => Ok(json!({
            "error": format!("Order {} not found", args.order_id),
        })),
    }
}

#[derive(Deserialize)]
struct InteractionArgs {
    drug1: String,
    drug2: String,
}

fn check_drug_interactions(args: &Value) -> Result<Value, FunctionError> {
    let args: InteractionArgs = parse_args(args)?;
    let a = args.drug1.to_lowercase();
    let b = args.drug2.to_lowercase();

    let interaction = INTERACTIONS
        .iter()
        .find(|(x, y, _)| (*x == a && *y == b) || (*x == b && *y == a))
        .map(|(_, _, warning)| *warning);

    match interaction {
        Some(warning) => Ok(json!({
            "interaction_found": true,
            "drugs": [args.drug1, args.drug2],
            "warning": warning,
            "severity": "moderate",
            "recommendation": "Consult with healthcare provider before combining these medications",
        })),
        None => Ok(json!({
            "interaction_found": false,
            "drugs": [args.drug1, args.drug2],
            "message": "No known interactions found in our database",
            "note": "This is not a comprehensive check. Always consult healthcare providers.",
        })),
    }
}

#[derive(Deserialize)]
struct AlternativesArgs {
    drug_name: String,
}

fn get_drug_alternatives(args: &Value) -> Result<Value, FunctionError> {
    let args: AlternativesArgs = parse_args(args)?;
    let key = args.drug_name.to_lowercase();

    let alternatives = ALTERNATIVES
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, alts)| *alts)
        .unwrap_or(&[]);

    if alternatives.is_empty() {
        return Ok(json!({
            "original_drug": args.drug_name,
            "alternatives_found": 0,
            "message": format!("No alternatives found for {} in our database", args.drug_name),
        }));
    }

    let detailed: Vec<Value> = alternatives
        .iter()
        .map(|alt| match find_drug(alt) {
            Some(drug) => json!({
                "name": drug.name,
                "description": drug.description,
                "price": drug.price,
            }),
            None => json!({
                "name": capitalize(alt),
                "description": "Alternative medication",
                "price": "N/A",
            }),
        })
        .collect();

    Ok(json!({
        "original_drug": args.drug_name,
        "alternatives_found": detailed.len(),
        "alternatives": detailed,
        "note": "Always consult with healthcare provider before switching medications",
    }))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Deserialize)]
struct PrescriptionStatusArgs {
    prescription_id: String,
}

fn check_prescription_status(args: &Value) -> Result<Value, FunctionError> {
    let args: PrescriptionStatusArgs = parse_args(args)?;
    let key = args.prescription_id.to_uppercase();

    match PRESCRIPTIONS.iter().find(|(id, ..)| *id == key) {
        Some((_, status, patient, drug, detail_key, detail)) => {
            let mut result = json!({
                "prescription_id": args.prescription_id,
                "status": status,
                "patient": patient,
                "drug": drug,
            });
            result[*detail_key] = json!(detail);
            Ok(result)
        }
        None => Ok(json!({
            "error": format!("Prescription {} not found", args.prescription_id),
        })),
    }
}
