use std::io::{self, IsTerminal, Write};

use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::task::{Priority, Task, TodoList};
use crate::todos::Counts;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.color()? && io::stdout().is_terminal();
        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    /// Rows are numbered from 1 in view order.
    #[tracing::instrument(skip(self, out, tasks))]
    pub fn write_task_table<W: Write>(&self, out: W, tasks: &[&Task]) -> anyhow::Result<()> {
        let headers = vec![
            "#".to_string(),
            "Done".to_string(),
            "Pri".to_string(),
            "Created".to_string(),
            "Text".to_string(),
        ];

        let mut rows = Vec::with_capacity(tasks.len());
        for (idx, task) in tasks.iter().enumerate() {
            let pri = match task.priority {
                Priority::High => self.paint("H", "31"),
                Priority::Medium => self.paint("M", "33"),
                Priority::Low => self.paint("L", "32"),
            };
            let mark = if task.done { "[x]" } else { "[ ]" };
            let text = if task.done {
                self.paint(&task.text, "2")
            } else {
                task.text.clone()
            };

            rows.push(vec![
                self.paint(&(idx + 1).to_string(), "33"),
                mark.to_string(),
                pri,
                task.created_at.format("%Y-%m-%d %H:%M").to_string(),
                text,
            ]);
        }

        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip(self, out, task))]
    pub fn write_task_info<W: Write>(&self, mut out: W, task: &Task) -> anyhow::Result<()> {
        writeln!(out, "id        {}", task.id)?;
        writeln!(out, "text      {}", task.text)?;
        writeln!(out, "done      {}", if task.done { "yes" } else { "no" })?;
        writeln!(out, "priority  {}", task.priority)?;
        writeln!(out, "list      {}", task.list_id)?;
        writeln!(out, "created   {}", task.created_at.format("%Y%m%dT%H%M%SZ"))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, out, lists))]
    pub fn write_lists<W: Write>(
        &self,
        out: W,
        lists: &[TodoList],
        selected: &str,
    ) -> anyhow::Result<()> {
        let headers = vec![
            " ".to_string(),
            "ID".to_string(),
            "Name".to_string(),
            "Color".to_string(),
        ];
        let rows = lists
            .iter()
            .map(|list| {
                let marker = if list.id == selected { "*" } else { "" };
                vec![
                    marker.to_string(),
                    list.id.clone(),
                    self.tint(&list.name, &list.color),
                    list.color.clone(),
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    pub fn write_counts<W: Write>(&self, mut out: W, counts: Counts) -> anyhow::Result<()> {
        writeln!(
            out,
            "{} pending, {} done",
            self.paint(&counts.pending.to_string(), "33"),
            self.paint(&counts.done.to_string(), "32")
        )?;
        Ok(())
    }

    pub fn print_task_table(&self, tasks: &[&Task]) -> anyhow::Result<()> {
        self.write_task_table(io::stdout().lock(), tasks)
    }

    pub fn print_task_info(&self, task: &Task) -> anyhow::Result<()> {
        self.write_task_info(io::stdout().lock(), task)
    }

    pub fn print_lists(&self, lists: &[TodoList], selected: &str) -> anyhow::Result<()> {
        self.write_lists(io::stdout().lock(), lists, selected)
    }

    pub fn print_counts(&self, counts: Counts) -> anyhow::Result<()> {
        self.write_counts(io::stdout().lock(), counts)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }

    /// Paints `text` with a `#rgb`/`#rrggbb` list color.
    fn tint(&self, text: &str, hex: &str) -> String {
        match parse_hex_rgb(hex) {
            Some((r, g, b)) => self.paint(text, &format!("38;2;{r};{g};{b}")),
            None => text.to_string(),
        }
    }
}

fn parse_hex_rgb(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#')?;
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match digits.len() {
        3 => {
            let mut it = digits.chars().map(|c| channel(&format!("{c}{c}")));
            Some((it.next()??, it.next()??, it.next()??))
        }
        6 => Some((
            channel(digits.get(0..2)?)?,
            channel(digits.get(2..4)?)?,
            channel(digits.get(4..6)?)?,
        )),
        _ => None,
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
