use serde::{Deserialize, Serialize};

use forgebi_connectors::DataSource;
use forgebi_core::WidgetId;

use crate::dashboard::DashboardFilter;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetType {
    Metric,
    Chart,
    Table,
    Map,
    Gauge,
    Funnel,
    Treemap,
    Heatmap,
    Scatter,
    Radar,
    Sankey,
    Waterfall,
}

impl WidgetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WidgetType::Metric => "metric",
            WidgetType::Chart => "chart",
            WidgetType::Table => "table",
            WidgetType::Map => "map",
            WidgetType::Gauge => "gauge",
            WidgetType::Funnel => "funnel",
            WidgetType::Treemap => "treemap",
            WidgetType::Heatmap => "heatmap",
            WidgetType::Scatter => "scatter",
            WidgetType::Radar => "radar",
            WidgetType::Sankey => "sankey",
            WidgetType::Waterfall => "waterfall",
        }
    }
}

/// Grid cell of the widget's top-left corner.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: u32,
    pub y: u32,
}

/// Size in grid units, with optional resize bounds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
    pub min_width: Option<u32>,
    pub max_width: Option<u32>,
    pub min_height: Option<u32>,
    pub max_height: Option<u32>,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            min_width: None,
            max_width: None,
            min_height: None,
            max_height: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetConfig {
    pub theme: Option<String>,
    #[serde(default)]
    pub colors: Vec<String>,
    pub show_legend: bool,
    pub show_tooltip: bool,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            theme: None,
            colors: Vec::new(),
            show_legend: true,
            show_tooltip: true,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Distinct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis {
    pub field: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub field: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    pub field: String,
    pub descending: bool,
}

/// How fetched rows are turned into a chart/table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Visualization {
    pub x_axis: Option<Axis>,
    pub y_axis: Option<Axis>,
    #[serde(default)]
    pub series: Vec<Series>,
    pub aggregation: Option<Aggregation>,
    /// Numeric fields the aggregation applies to.
    #[serde(default)]
    pub measures: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    pub sort: Option<SortOrder>,
    /// Display format hint (e.g. `currency`, `percent`, `0.00`).
    pub format: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionTrigger {
    Click,
    Hover,
    Select,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionAction {
    DrillDown,
    Filter,
    Navigate,
    Modal,
    Tooltip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub trigger: InteractionTrigger,
    pub action: InteractionAction,
    /// Target dashboard, URL or field, depending on the action.
    pub target: Option<String>,
}

/// A single visual element bound to one data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: WidgetId,
    #[serde(rename = "type")]
    pub widget_type: WidgetType,
    pub title: String,
    pub position: Position,
    pub size: Size,
    #[serde(default)]
    pub config: WidgetConfig,
    pub data_source: DataSource,
    #[serde(default)]
    pub visualization: Visualization,
    #[serde(default)]
    pub filters: Vec<DashboardFilter>,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    pub refresh_rate_secs: u64,
    /// Allows `data_source.refresh_interval_secs` to exceed the dashboard's.
    #[serde(default)]
    pub refresh_override: bool,
    pub visible: bool,
}

impl Widget {
    pub fn new(
        id: impl Into<WidgetId>,
        widget_type: WidgetType,
        title: impl Into<String>,
        data_source: DataSource,
    ) -> Self {
        let refresh_rate_secs = data_source.refresh_interval_secs;
        Self {
            id: id.into(),
            widget_type,
            title: title.into(),
            position: Position::default(),
            size: Size::new(4, 2),
            config: WidgetConfig::default(),
            data_source,
            visualization: Visualization::default(),
            filters: Vec::new(),
            interactions: Vec::new(),
            refresh_rate_secs,
            refresh_override: false,
            visible: true,
        }
    }

    pub fn at(mut self, x: u32, y: u32) -> Self {
        self.position = Position { x, y };
        self
    }

    pub fn sized(mut self, width: u32, height: u32) -> Self {
        self.size.width = width;
        self.size.height = height;
        self
    }

    pub fn with_visualization(mut self, visualization: Visualization) -> Self {
        self.visualization = visualization;
        self
    }

    pub fn with_interaction(mut self, interaction: Interaction) -> Self {
        self.interactions.push(interaction);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}
