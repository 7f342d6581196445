//! End-of-run statistics, rendered as one framed block per component.

use std::fmt;

pub trait Width {
    fn width_by_chunk_size(chunk_size: usize) -> usize;
    /// most cells per row that still fit into `max_width`, at least one.
    fn chunk_size(max_width: usize) -> usize {
        (2..)
            .take_while(|&n| Self::width_by_chunk_size(n) <= max_width)
            .last()
            .unwrap_or(1)
    }
}

pub trait Stat {
    fn view(&self, max_width: usize) -> Box<dyn StatView + '_>;
}

pub trait StatView: fmt::Display {
    fn header(&self) -> &'static str;
    fn width(&self) -> usize;
}

pub trait AddStats {
    fn add_stats(&self, buf: &mut Stats);
}

#[derive(Default)]
pub struct Stats {
    stats: Vec<Box<dyn Stat>>,
}

impl Stats {
    pub fn push(&mut self, stat: Box<dyn Stat>) {
        self.stats.push(stat)
    }
    pub fn len(&self) -> usize {
        self.stats.len()
    }
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
    pub fn view(&self, max_width: usize) -> StatAllView<'_> {
        StatAllView {
            views: self.stats.iter().map(|s| s.view(max_width)).collect(),
        }
    }
}

pub struct StatAllView<'s> {
    views: Vec<Box<dyn StatView + 's>>,
}

impl fmt::Display for StatAllView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .views
            .iter()
            .map(|v| v.width().max(v.header().len() + 4))
            .fold(" statistics ".len(), usize::max);
        writeln!(f, "{:=^width$}", " statistics ")?;
        for (i, v) in self.views.iter().enumerate() {
            if i > 0 {
                writeln!(f, "{:-<width$}", "")?;
            }
            writeln!(f, "[{}]", v.header())?;
            writeln!(f, "{v}")?;
        }
        write!(f, "{:=<width$}", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl Width for Fixed {
        fn width_by_chunk_size(chunk_size: usize) -> usize {
            chunk_size * 10
        }
    }

    struct Line(&'static str);

    impl Stat for Line {
        fn view(&self, _: usize) -> Box<dyn StatView + '_> {
            Box::new(self)
        }
    }

    impl StatView for &'_ Line {
        fn header(&self) -> &'static str {
            "line"
        }
        fn width(&self) -> usize {
            20
        }
    }

    impl fmt::Display for &'_ Line {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "  {}", self.0)
        }
    }

    #[test]
    fn test_chunk_size() {
        assert_eq!(Fixed::chunk_size(35), 3);
        assert_eq!(Fixed::chunk_size(40), 4);
        assert_eq!(Fixed::chunk_size(5), 1);
    }

    #[test]
    fn test_view() {
        let mut ss = Stats::default();
        assert_eq!(ss.view(80).to_string(), " statistics \n============");
        ss.push(Box::new(Line("a")));
        ss.push(Box::new(Line("b")));
        assert_eq!(ss.len(), 2);
        let s = ss.view(80).to_string();
        let lines: Vec<_> = s.lines().collect();
        assert_eq!(lines[0], "==== statistics ====");
        assert_eq!(&lines[1..6], ["[line]", "  a", "-".repeat(20).as_str(), "[line]", "  b"]);
        assert_eq!(lines[6], "=".repeat(20));
    }
}
