//! Individual cron fields.

use std::fmt;

use crate::error::FieldError;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// The five positions of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl Field {
    /// All fields in expression order.
    pub const ALL: [Field; 5] = [
        Field::Minute,
        Field::Hour,
        Field::DayOfMonth,
        Field::Month,
        Field::DayOfWeek,
    ];

    /// Inclusive lower bound.
    pub fn min(self) -> u8 {
        match self {
            Field::Minute | Field::Hour | Field::DayOfWeek => 0,
            Field::DayOfMonth | Field::Month => 1,
        }
    }

    /// Inclusive upper bound.
    pub fn max(self) -> u8 {
        match self {
            Field::Minute => 59,
            Field::Hour => 23,
            Field::DayOfMonth => 31,
            Field::Month => 12,
            Field::DayOfWeek => 6,
        }
    }

    fn alias(self, name: &str) -> Option<u8> {
        let names: &[&str] = match self {
            Field::Month => &MONTH_NAMES,
            Field::DayOfWeek => &WEEKDAY_NAMES,
            _ => return None,
        };
        let upper = name.to_ascii_uppercase();
        names
            .iter()
            .position(|n| *n == upper)
            .map(|idx| idx as u8 + self.min())
    }

    fn value(self, raw: &str) -> Result<u8, String> {
        if raw.is_empty() {
            return Err("empty value".to_string());
        }
        if raw.bytes().all(|b| b.is_ascii_digit()) {
            let value: u32 = raw
                .parse()
                .map_err(|_| format!("value {} out of range {}-{}", raw, self.min(), self.max()))?;
            if value < u32::from(self.min()) || value > u32::from(self.max()) {
                return Err(format!(
                    "value {} out of range {}-{}",
                    value,
                    self.min(),
                    self.max()
                ));
            }
            return Ok(value as u8);
        }
        self.alias(raw)
            .ok_or_else(|| format!("'{}' is not a number or a known name", raw))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Minute => "minute",
            Field::Hour => "hour",
            Field::DayOfMonth => "day-of-month",
            Field::Month => "month",
            Field::DayOfWeek => "day-of-week",
        };
        f.write_str(name)
    }
}

/// Where a step starts counting from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepBase {
    /// `*/s`
    Any,
    /// `n/s`, counting from `n` to the field maximum.
    From(u8),
    /// `a-b/s`
    Range(u8, u8),
}

/// One comma separated token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldItem {
    Any,
    Value(u8),
    Range(u8, u8),
    Step { base: StepBase, step: u8 },
}

impl FieldItem {
    fn parse(field: Field, token: &str) -> Result<Self, String> {
        if token == "*" {
            return Ok(FieldItem::Any);
        }

        if let Some((base, step)) = token.split_once('/') {
            let step: u8 = match step.parse::<u32>() {
                Ok(0) => return Err("step must be greater than zero".to_string()),
                Ok(s) if s <= u32::from(field.max()) + 1 => s as u8,
                Ok(s) => return Err(format!("step {} larger than the field span", s)),
                Err(_) => return Err(format!("invalid step '{}'", step)),
            };
            let base = match base {
                "*" => StepBase::Any,
                b if b.contains('-') => {
                    let (lo, hi) = Self::range(field, b)?;
                    StepBase::Range(lo, hi)
                }
                b => StepBase::From(field.value(b)?),
            };
            return Ok(FieldItem::Step { base, step });
        }

        if token.contains('-') {
            let (lo, hi) = Self::range(field, token)?;
            return Ok(FieldItem::Range(lo, hi));
        }

        field.value(token).map(FieldItem::Value)
    }

    fn range(field: Field, token: &str) -> Result<(u8, u8), String> {
        let (lo, hi) = token
            .split_once('-')
            .ok_or_else(|| format!("invalid range '{}'", token))?;
        let lo = field.value(lo)?;
        let hi = field.value(hi)?;
        if lo > hi {
            return Err(format!("range start {} is greater than end {}", lo, hi));
        }
        Ok((lo, hi))
    }

    fn mask(&self, field: Field) -> u64 {
        let span = |lo: u8, hi: u8, step: u8| {
            (lo..=hi)
                .step_by(usize::from(step))
                .fold(0u64, |acc, v| acc | (1u64 << v))
        };
        match *self {
            FieldItem::Any => span(field.min(), field.max(), 1),
            FieldItem::Value(v) => 1u64 << v,
            FieldItem::Range(lo, hi) => span(lo, hi, 1),
            FieldItem::Step { base, step } => match base {
                StepBase::Any => span(field.min(), field.max(), step),
                StepBase::From(start) => span(start, field.max(), step),
                StepBase::Range(lo, hi) => span(lo, hi, step),
            },
        }
    }
}

impl fmt::Display for FieldItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldItem::Any => f.write_str("*"),
            FieldItem::Value(v) => write!(f, "{}", v),
            FieldItem::Range(lo, hi) => write!(f, "{}-{}", lo, hi),
            FieldItem::Step { base, step } => match base {
                StepBase::Any => write!(f, "*/{}", step),
                StepBase::From(start) => write!(f, "{}/{}", start, step),
                StepBase::Range(lo, hi) => write!(f, "{}-{}/{}", lo, hi, step),
            },
        }
    }
}

/// A parsed field: its items plus the expanded set of matching values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronField {
    field: Field,
    items: Vec<FieldItem>,
    mask: u64,
}

impl CronField {
    /// Parse one field, collecting an error for every bad token.
    pub fn parse(field: Field, text: &str) -> Result<Self, Vec<FieldError>> {
        let mut items = Vec::new();
        let mut errors = Vec::new();

        for token in text.split(',') {
            match FieldItem::parse(field, token) {
                Ok(item) => items.push(item),
                Err(message) => errors.push(FieldError::new(field, token, message)),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let mask = items.iter().fold(0u64, |acc, item| acc | item.mask(field));
        Ok(Self { field, items, mask })
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn items(&self) -> &[FieldItem] {
        &self.items
    }

    /// Whether `value` satisfies this field.
    pub fn contains(&self, value: u32) -> bool {
        value < 64 && self.mask & (1u64 << value) != 0
    }

    /// Matching values in ascending order.
    pub fn values(&self) -> impl DoubleEndedIterator<Item = u32> + '_ {
        (u32::from(self.field.min())..=u32::from(self.field.max())).filter(|v| self.contains(*v))
    }

    /// A field is restricted unless it starts with `*` (cron day matching rule).
    pub fn is_restricted(&self) -> bool {
        !matches!(
            self.items.first(),
            Some(FieldItem::Any)
                | Some(FieldItem::Step {
                    base: StepBase::Any,
                    ..
                })
        )
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.items.iter().map(ToString::to_string).collect();
        f.write_str(&rendered.join(","))
    }
}
