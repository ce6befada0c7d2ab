//! Automotive spare-parts catalog

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::tools::Tool;
use crate::Result;

use super::{required_str, BuiltinProvider};

/// One catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparePart {
    pub name: &'static str,
    pub part_type: &'static str,
    pub reference_id: &'static str,
    pub model: &'static str,
    pub start_year: u16,
    pub end_year: u16,
    pub stock: u32,
}

const fn part(
    name: &'static str,
    part_type: &'static str,
    reference_id: &'static str,
    model: &'static str,
    years: (u16, u16),
    stock: u32,
) -> SparePart {
    SparePart {
        name,
        part_type,
        reference_id,
        model,
        start_year: years.0,
        end_year: years.1,
        stock,
    }
}

/// Initial catalog contents
pub const SPARE_PARTS: [SparePart; 10] = [
    part("ZF 8HP45 Automatic Transmission", "gearbox", "ZF8HP45-001", "Chrysler 300C", (2012, 2014), 5),
    part("Aisin AWTF-80 SC Automatic Transmission", "gearbox", "AWTF80SC-001", "Ford Focus", (2013, 2018), 3),
    part("Brembo P83045N Front Brake Pads", "brake pads", "BRP83045N-001", "Toyota Camry", (2018, 2023), 15),
    part("Bosch 3330 Premium Oil Filter", "oil filter", "BOSCH3330-001", "Honda Civic", (2016, 2021), 30),
    part("Denso 234-9005 Air-Fuel Ratio Sensor", "sensor", "DENSO2349005-001", "Lexus RX350", (2010, 2015), 8),
    part("Valeo 52285606 Clutch Kit", "clutch", "VAL52285606-001", "Volkswagen Golf", (2015, 2020), 7),
    part("Monroe 58640 Shock Absorber", "suspension", "MON58640-001", "Chevrolet Silverado", (2014, 2018), 12),
    part("Gates K060841 Serpentine Belt", "belt", "GATESK060841-001", "Dodge Ram 1500", (2011, 2018), 25),
    part("ACDelco 41-962 Professional Platinum Spark Plug", "spark plug", "ACD41962-001", "Ford F-150", (2011, 2014), 50),
    part("TYC 20-9049-00-1 Right Headlight Assembly", "headlight", "TYC209049-001", "Nissan Altima", (2013, 2015), 9),
];

type Inventory = Arc<Mutex<Vec<SparePart>>>;

pub(super) fn provider() -> BuiltinProvider {
    let inventory: Inventory = Arc::new(Mutex::new(SPARE_PARTS.to_vec()));

    let mut provider = BuiltinProvider::new("spare-parts");
    provider.register(CheckAvailabilityTool { inventory: inventory.clone() });
    provider.register(PartDetailsTool { inventory: inventory.clone() });
    provider.register(OrderPartTool { inventory });
    provider
}

/// List parts of a type that fit a car model
struct CheckAvailabilityTool {
    inventory: Inventory,
}

#[async_trait]
impl Tool for CheckAvailabilityTool {
    fn name(&self) -> &str { "check_availability" }
    fn description(&self) -> &str {
        "Check the availability of a certain type of spare part for a specific car model."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "part_type": {
                    "type": "string",
                    "description": "Kind of part, e.g. \"gearbox\" or \"brake pads\""
                },
                "car_model": {
                    "type": "string",
                    "description": "Car model, e.g. \"Ford Focus\""
                }
            },
            "required": ["part_type", "car_model"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let part_type = required_str(&params, "part_type")?;
        let car_model = required_str(&params, "car_model")?;

        let inventory = self.inventory.lock().await;
        let matches: Vec<_> = inventory
            .iter()
            .filter(|p| {
                p.part_type.eq_ignore_ascii_case(part_type) && p.model.eq_ignore_ascii_case(car_model)
            })
            .collect();

        if matches.is_empty() {
            return Ok(format!("No {} found for {}.", part_type, car_model));
        }

        let mut response = format!("Available {} for {}:\n", part_type, car_model);
        for p in matches {
            response.push_str(&format!(
                "- {} (Ref: {}, Stock: {})\n",
                p.name, p.reference_id, p.stock
            ));
        }
        Ok(response)
    }
}

/// Describe one part by reference
struct PartDetailsTool {
    inventory: Inventory,
}

#[async_trait]
impl Tool for PartDetailsTool {
    fn name(&self) -> &str { "get_part_details" }
    fn description(&self) -> &str {
        "Get detailed information about a spare part using its reference ID."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reference_id": {
                    "type": "string",
                    "description": "Catalog reference, e.g. \"ZF8HP45-001\""
                }
            },
            "required": ["reference_id"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let reference_id = required_str(&params, "reference_id")?;

        let inventory = self.inventory.lock().await;
        let Some(p) = inventory.iter().find(|p| p.reference_id == reference_id) else {
            return Ok(format!("Part with reference ID {} not found.", reference_id));
        };

        Ok(format!(
            "Details for {}:\n\
             - Reference ID: {}\n\
             - Type: {}\n\
             - Compatibility: {} ({} - {})\n\
             - Stock: {}",
            p.name, p.reference_id, p.part_type, p.model, p.start_year, p.end_year, p.stock
        ))
    }
}

/// Reserve one unit of a part for a customer
struct OrderPartTool {
    inventory: Inventory,
}

#[async_trait]
impl Tool for OrderPartTool {
    fn name(&self) -> &str { "order_part" }
    fn description(&self) -> &str {
        "Order a spare part by its reference ID for a given customer ID. The part must be in stock."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reference_id": {
                    "type": "string",
                    "description": "Catalog reference of the part"
                },
                "customer_id": {
                    "type": "string",
                    "description": "Customer placing the order"
                }
            },
            "required": ["reference_id", "customer_id"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let reference_id = required_str(&params, "reference_id")?;
        let customer_id = required_str(&params, "customer_id")?;

        let mut inventory = self.inventory.lock().await;
        let Some(p) = inventory.iter_mut().find(|p| p.reference_id == reference_id) else {
            return Ok(format!("Part with reference ID {} not found.", reference_id));
        };

        if p.stock == 0 {
            return Ok(format!(
                "Error: Part {} (Ref: {}) is out of stock.",
                p.name, reference_id
            ));
        }

        p.stock -= 1;
        Ok(format!(
            "Order successful! Part {} (Ref: {}) has been ordered for customer {}. New stock level: {}.",
            p.name, reference_id, customer_id, p.stock
        ))
    }
}
