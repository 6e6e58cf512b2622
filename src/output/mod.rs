//! Output formatting and management

use crate::device::{DeviceRecord, DeviceStatus};
use crate::enrichment::WifiStation;
use crate::request::{DevicesResponse, SubnetsResponse};
use crate::tasks::Task;
use colored::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Write};

/// Output format options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub file: Option<String>,
    pub colored: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            file: None,
            colored: true,
        }
    }
}

/// Main output manager
pub struct OutputManager {
    config: OutputConfig,
}

impl OutputManager {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    /// Write a device list
    pub fn write_devices(&self, devices: &[DeviceRecord]) -> io::Result<()> {
        let output = match self.config.format {
            OutputFormat::Text => self.format_devices_text(devices),
            OutputFormat::Json => to_json(&DevicesResponse { devices: devices.to_vec() })?,
        };
        self.emit(&output)
    }

    /// Write discovered subnets
    pub fn write_subnets(&self, response: &SubnetsResponse) -> io::Result<()> {
        let output = match self.config.format {
            OutputFormat::Text => {
                let mut out = String::new();
                if response.subnets.is_empty() {
                    out.push_str(&self.colorize("No subnets found\n", Tint::Warn));
                }
                for subnet in &response.subnets {
                    out.push_str(&format!("{}\n", subnet));
                }
                out
            }
            OutputFormat::Json => to_json(response)?,
        };
        self.emit(&output)
    }

    /// Write Wi-Fi stations
    pub fn write_stations(&self, stations: &[WifiStation]) -> io::Result<()> {
        let output = match self.config.format {
            OutputFormat::Text => {
                let mut out = String::new();
                if stations.is_empty() {
                    out.push_str(&self.colorize("No Wi-Fi stations found\n", Tint::Warn));
                }
                for station in stations {
                    let ip = station.ip.map(|ip| ip.to_string()).unwrap_or_else(|| "-".to_string());
                    out.push_str(&format!("{:<17}  {:<15}  {}\n", station.mac, ip, station.name));
                }
                out
            }
            OutputFormat::Json => to_json(&serde_json::json!({ "stations": stations }))?,
        };
        self.emit(&output)
    }

    /// Write the approved task list
    pub fn write_tasks(&self, tasks: &[Task]) -> io::Result<()> {
        let output = match self.config.format {
            OutputFormat::Text => {
                let mut out = String::new();
                if tasks.is_empty() {
                    out.push_str(&self.colorize("No approved tasks\n", Tint::Warn));
                }
                for task in tasks {
                    let params: Vec<&str> = task.params.iter().map(|p| p.name.as_str()).collect();
                    out.push_str(&self.colorize(&format!("{}\n", task.id), Tint::Header));
                    if task.name != task.id {
                        out.push_str(&format!("  {}\n", task.name));
                    }
                    if !task.description.is_empty() {
                        out.push_str(&format!("  {}\n", task.description));
                    }
                    if !params.is_empty() {
                        out.push_str(&format!("  params: {}\n", params.join(", ")));
                    }
                }
                out
            }
            OutputFormat::Json => to_json(&serde_json::json!({ "tasks": tasks }))?,
        };
        self.emit(&output)
    }

    fn emit(&self, output: &str) -> io::Result<()> {
        match &self.config.file {
            Some(filename) => {
                let mut file = File::create(filename)?;
                file.write_all(output.as_bytes())?;
            }
            None => {
                print!("{}", output);
            }
        }
        Ok(())
    }

    /// Format devices as an aligned table
    pub fn format_devices_text(&self, devices: &[DeviceRecord]) -> String {
        let mut output = String::new();

        if devices.is_empty() {
            output.push_str(&self.colorize("No devices found\n", Tint::Warn));
            return output;
        }

        let header = format!(
            "{:<15}  {:<7}  {:<12}  {:<17}  {:<24}  {}\n",
            "IP", "STATUS", "TYPE", "MAC", "VENDOR", "NAME"
        );
        output.push_str(&self.colorize(&header, Tint::Header));

        for device in devices {
            let line = format!(
                "{:<15}  {:<7}  {:<12}  {:<17}  {:<24}  {}\n",
                device.ip,
                status_label(device.status),
                device.kind.as_str(),
                device.mac.as_deref().unwrap_or("-"),
                truncate(device.vendor.as_deref().unwrap_or("-"), 24),
                device.name
            );
            let tint = if device.is_online() { Tint::Online } else { Tint::Offline };
            output.push_str(&self.colorize(&line, tint));
        }

        let online = devices.iter().filter(|d| d.is_online()).count();
        output.push_str(&format!("\n{} devices, {} online\n", devices.len(), online));
        output
    }

    fn colorize(&self, text: &str, tint: Tint) -> String {
        if !self.config.colored {
            return text.to_string();
        }
        match tint {
            Tint::Header => text.bright_cyan().bold().to_string(),
            Tint::Online => text.bright_green().to_string(),
            Tint::Offline => text.bright_black().to_string(),
            Tint::Warn => text.yellow().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Tint {
    Header,
    Online,
    Offline,
    Warn,
}

fn status_label(status: DeviceStatus) -> &'static str {
    match status {
        DeviceStatus::Online => "online",
        DeviceStatus::Offline => "offline",
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let cut: String = text.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

fn to_json<T: Serialize>(value: &T) -> io::Result<String> {
    let mut json = serde_json::to_string_pretty(value).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    json.push('\n');
    Ok(json)
}
