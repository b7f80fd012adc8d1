//! Appointment booking tool and its in-memory store.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use uuid::Uuid;

use super::{ToolDeclaration, ToolError, ToolHandler};

/// Name of the booking tool as declared to the service.
pub const BOOK_APPOINTMENT: &str = "bookAppointment";

/// Visit type used when the caller does not name one.
pub const DEFAULT_VISIT_TYPE: &str = "Generale";

/// A booked appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub patient_name: String,
    pub date: String,
    pub time: String,
    #[serde(rename = "type")]
    pub visit_type: String,
}

/// Most-recent-first list of appointments booked in this process.
#[derive(Clone)]
pub struct AppointmentStore {
    appointments: Arc<RwLock<Vec<Appointment>>>,
    changes: Arc<watch::Sender<usize>>,
}

impl Default for AppointmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            appointments: Arc::new(RwLock::new(Vec::new())),
            changes: Arc::new(changes),
        }
    }

    /// Insert at the head of the list.
    pub fn append(&self, appointment: Appointment) {
        let count = {
            let mut appointments = self.appointments.write();
            appointments.insert(0, appointment);
            appointments.len()
        };
        self.changes.send_replace(count);
    }

    /// Snapshot, most recent first.
    pub fn list(&self) -> Vec<Appointment> {
        self.appointments.read().clone()
    }

    pub fn len(&self) -> usize {
        self.appointments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver notified with the new count after every append.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.changes.subscribe()
    }
}

impl std::fmt::Debug for AppointmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppointmentStore")
            .field("len", &self.len())
            .finish()
    }
}

/// Arguments of `bookAppointment`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookAppointmentArgs {
    pub patient_name: String,
    pub date: String,
    pub time: String,
    #[serde(rename = "type", default)]
    pub visit_type: Option<String>,
}

impl BookAppointmentArgs {
    pub fn from_map(args: &Map<String, Value>) -> Result<Self, ToolError> {
        let invalid = |reason: String| ToolError::InvalidArguments {
            tool: BOOK_APPOINTMENT.to_string(),
            reason,
        };

        let parsed: Self = serde_json::from_value(Value::Object(args.clone()))
            .map_err(|e| invalid(e.to_string()))?;

        for (field, value) in [
            ("patientName", &parsed.patient_name),
            ("date", &parsed.date),
            ("time", &parsed.time),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(format!("{field} must not be empty")));
            }
        }
        Ok(parsed)
    }

    pub fn visit_type(&self) -> &str {
        self.visit_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_VISIT_TYPE)
    }
}

/// Books an appointment into the store.
#[derive(Debug, Clone)]
pub struct BookAppointmentTool {
    store: AppointmentStore,
}

impl BookAppointmentTool {
    pub fn new(store: AppointmentStore) -> Self {
        Self { store }
    }
}

impl ToolHandler for BookAppointmentTool {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: BOOK_APPOINTMENT.to_string(),
            description: "Prenota un appuntamento medico.".to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "patientName": {
                        "type": "STRING",
                        "description": "Il nome e cognome del paziente."
                    },
                    "date": {
                        "type": "STRING",
                        "description": "La data dell'appuntamento (es. Lunedì prossimo, 12 Ottobre)."
                    },
                    "time": {
                        "type": "STRING",
                        "description": "L'orario dell'appuntamento."
                    },
                    "type": {
                        "type": "STRING",
                        "description": "Il tipo di visita (Generale, Cardiologia, Ortopedia, etc.)."
                    }
                },
                "required": ["patientName", "date", "time"]
            }),
        }
    }

    fn invoke(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let args = BookAppointmentArgs::from_map(args)?;
        let appointment = Appointment {
            id: Uuid::new_v4().to_string(),
            patient_name: args.patient_name.trim().to_string(),
            date: args.date.trim().to_string(),
            time: args.time.trim().to_string(),
            visit_type: args.visit_type().to_string(),
        };

        let message = format!(
            "Appuntamento confermato per {} il {} alle {}.",
            appointment.patient_name, appointment.date, appointment.time
        );
        tracing::info!(
            appointment_id = %appointment.id,
            visit_type = %appointment.visit_type,
            "Appointment booked"
        );
        self.store.append(appointment);
        Ok(message)
    }
}
