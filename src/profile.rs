//! Per-product data-point tables and the generic operations built on them.
//!
//! A profile only names which dps key carries which capability; every product
//! shares the same [`Appliance`] logic on top of [`TuyaClient`].

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::error::{AppError, Result};
use crate::tuya::{Dps, TuyaClient};

/// Data-point lookup table for one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoints {
    /// Power switch (bool).
    #[serde(default = "default_power")]
    pub power: String,
    /// Work mode ("white" / "colour").
    #[serde(default)]
    pub mode: Option<String>,
    /// Brightness level (integer).
    #[serde(default)]
    pub brightness: Option<String>,
    /// Colour string.
    #[serde(default)]
    pub colour: Option<String>,
    /// Extra values written together with every power change.
    #[serde(default)]
    pub power_extras: Dps,
    /// Scene values written together with a colour change.
    #[serde(default)]
    pub colour_scene: Dps,
}

fn default_power() -> String {
    "1".to_string()
}

impl Default for DataPoints {
    fn default() -> Self {
        Self::generic()
    }
}

impl DataPoints {
    /// Power switch at "1" and nothing else.
    pub fn generic() -> Self {
        Self {
            power: default_power(),
            mode: None,
            brightness: None,
            colour: None,
            power_extras: Dps::new(),
            colour_scene: Dps::new(),
        }
    }

    /// Woox R4026 smart plug.
    pub fn woox_r4026() -> Self {
        let mut points = Self::generic();
        points.power_extras.insert("2".to_string(), json!(0));
        points
    }

    /// V-TAC 5011 RGB bulb.
    pub fn vtac_5011() -> Self {
        let scene = [
            ("6", "00ff0000000000"),
            ("7", "ffff500100ff00"),
            ("8", "ffff8003ff000000ff000000ff000000000000000000"),
            ("9", "ffff5001ff0000"),
            ("10", "ffff0505ff000000ff00ffff00ff00ff0000ff000000"),
            ("11", ""),
        ];

        Self {
            power: default_power(),
            mode: Some("2".to_string()),
            brightness: Some("3".to_string()),
            colour: Some("5".to_string()),
            power_extras: Dps::new(),
            colour_scene: scene.iter().map(|(k, v)| (k.to_string(), json!(v))).collect(),
        }
    }

    /// Look up a built-in profile by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "generic" => Some(Self::generic()),
            "woox_r4026" => Some(Self::woox_r4026()),
            "vtac_5011" => Some(Self::vtac_5011()),
            _ => None,
        }
    }

    /// Names accepted by [`DataPoints::builtin`].
    pub fn builtin_names() -> &'static [&'static str] {
        &["generic", "woox_r4026", "vtac_5011"]
    }

    /// dps for a power change.
    pub fn power_dps(&self, on: bool) -> Dps {
        let mut dps = Dps::new();
        dps.insert(self.power.clone(), Value::Bool(on));
        for (key, value) in &self.power_extras {
            dps.insert(key.clone(), value.clone());
        }
        dps
    }

    /// dps for a colour change. Pure white switches the bulb to white mode.
    pub fn colour_dps(&self, r: u8, g: u8, b: u8) -> Result<Dps> {
        let mode = self
            .mode
            .as_ref()
            .ok_or_else(|| AppError::unsupported("no work mode data point"))?;

        let mut dps = Dps::new();
        dps.insert(self.power.clone(), Value::Bool(true));

        if (r, g, b) == (255, 255, 255) {
            dps.insert(mode.clone(), json!("white"));
            return Ok(dps);
        }

        let colour = self
            .colour
            .as_ref()
            .ok_or_else(|| AppError::unsupported("no colour data point"))?;
        dps.insert(mode.clone(), json!("colour"));
        dps.insert(colour.clone(), json!(format!("{r:02x}{g:02x}{b:02x}0000ffff")));
        for (key, value) in &self.colour_scene {
            dps.insert(key.clone(), value.clone());
        }
        Ok(dps)
    }

    /// dps for a brightness change (also powers on).
    pub fn brightness_dps(&self, level: u32) -> Result<Dps> {
        let key = self
            .brightness
            .as_ref()
            .ok_or_else(|| AppError::unsupported("no brightness data point"))?;

        let mut dps = Dps::new();
        dps.insert(self.power.clone(), Value::Bool(true));
        dps.insert(key.clone(), json!(level));
        Ok(dps)
    }
}

/// A device driven through its data-point table.
#[derive(Debug, Clone)]
pub struct Appliance {
    client: TuyaClient,
    points: DataPoints,
}

impl Appliance {
    pub fn new(client: TuyaClient, points: DataPoints) -> Self {
        Self { client, points }
    }

    pub fn client(&self) -> &TuyaClient {
        &self.client
    }

    pub fn points(&self) -> &DataPoints {
        &self.points
    }

    /// Power state; `false` when the device does not report the power key.
    pub async fn is_on(&self) -> Result<bool> {
        let dps = self.client.get(false).await?;
        Ok(power_state(&dps, &self.points.power).unwrap_or(false))
    }

    pub async fn turn_on(&self) -> Result<Dps> {
        self.set_power(true).await
    }

    pub async fn turn_off(&self) -> Result<Dps> {
        self.set_power(false).await
    }

    /// Flip the power state. Returns the new state, or `None` when the
    /// device did not report its power key (nothing is written then).
    pub async fn toggle(&self) -> Result<Option<bool>> {
        let dps = self.client.get(false).await?;
        let Some(on) = power_state(&dps, &self.points.power) else {
            info!("{}: no power state reported, not toggling", self.client.device().label());
            return Ok(None);
        };

        self.set_power(!on).await?;
        Ok(Some(!on))
    }

    pub async fn set_colour(&self, r: u8, g: u8, b: u8) -> Result<Dps> {
        let dps = self.points.colour_dps(r, g, b)?;
        self.client.set(&dps).await
    }

    pub async fn set_brightness(&self, level: u32) -> Result<Dps> {
        let dps = self.points.brightness_dps(level)?;
        self.client.set(&dps).await
    }

    async fn set_power(&self, on: bool) -> Result<Dps> {
        info!("{}: power {}", self.client.device().label(), if on { "on" } else { "off" });
        self.client.set(&self.points.power_dps(on)).await
    }
}

fn power_state(dps: &Dps, key: &str) -> Option<bool> {
    dps.get(key).and_then(Value::as_bool)
}
