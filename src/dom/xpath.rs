//! A small XPath 1.0 subset evaluated over the `scraper` tree.
//!
//! Supported: absolute and relative location paths, `/` and `//`, name tests,
//! `*`, `node()`, `text()`, `.`, `..`, a trailing `@attr` (or `@*`) step, and
//! predicates `[n]`, `[last()]`, `[@a]`, `[@a='v']`, `[text()='v']`,
//! `[contains(@a|text()|., 'v')]`, `[starts-with(..., 'v')]` joined with `and`.

use std::collections::{HashMap, HashSet};

use ego_tree::{NodeId, NodeRef};
use scraper::Node;

use crate::app::{GleanerError, Result};
use crate::dom::{collect_text, string_value};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Child,
    /// `//step`: children of every descendant-or-self node.
    Descendant,
    SelfNode,
    Parent,
    Attribute,
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name(String),
    AnyElement,
    Text,
    AnyNode,
}

#[derive(Debug, Clone, PartialEq)]
enum Subject {
    Attr(String),
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Equals,
    Contains,
    StartsWith,
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Position(usize),
    Last,
    Exists(Subject),
    Compare { subject: Subject, op: Op, value: String },
    And(Vec<Predicate>),
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

/// Result of evaluating a path: a node, or an attribute value.
#[derive(Debug, Clone, Copy)]
pub enum XValue<'a> {
    Node(NodeRef<'a, Node>),
    Attr(&'a str),
}

impl<'a> XValue<'a> {
    pub fn node(&self) -> Option<NodeRef<'a, Node>> {
        match self {
            XValue::Node(node) => Some(*node),
            XValue::Attr(_) => None,
        }
    }

    /// Attribute value, or the node's text.
    pub fn string(&self) -> String {
        match self {
            XValue::Node(node) => match node.value() {
                Node::Text(text) => text.trim().to_string(),
                _ => collect_text(*node),
            },
            XValue::Attr(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct XPath {
    source: String,
    absolute: bool,
    steps: Vec<Step>,
}

impl XPath {
    pub fn parse(expr: &str) -> Result<Self> {
        Parser::new(expr).parse()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn evaluate<'a>(&self, context: NodeRef<'a, Node>) -> Vec<XValue<'a>> {
        let start = if self.absolute {
            context.ancestors().last().unwrap_or(context)
        } else {
            context
        };

        let mut current = vec![XValue::Node(start)];
        for step in &self.steps {
            current = apply_step(step, &current);
            if current.is_empty() {
                break;
            }
        }
        current
    }

    pub fn nodes<'a>(&self, context: NodeRef<'a, Node>) -> Vec<NodeRef<'a, Node>> {
        self.evaluate(context)
            .into_iter()
            .filter_map(|v| v.node())
            .collect()
    }

    pub fn first_node<'a>(&self, context: NodeRef<'a, Node>) -> Option<NodeRef<'a, Node>> {
        self.nodes(context).into_iter().next()
    }

    /// First result as a string, skipping blanks.
    pub fn first_string(&self, context: NodeRef<'_, Node>) -> Option<String> {
        self.evaluate(context)
            .iter()
            .map(|v| v.string())
            .find(|s| !s.trim().is_empty())
    }
}

fn matches_test(node: &NodeRef<'_, Node>, test: &NodeTest) -> bool {
    match test {
        NodeTest::Name(name) => node
            .value()
            .as_element()
            .map(|e| e.name().eq_ignore_ascii_case(name))
            .unwrap_or(false),
        NodeTest::AnyElement => node.value().is_element(),
        NodeTest::Text => node.value().is_text(),
        NodeTest::AnyNode => true,
    }
}

fn apply_step<'a>(step: &Step, input: &[XValue<'a>]) -> Vec<XValue<'a>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |node: NodeRef<'a, Node>, out: &mut Vec<XValue<'a>>| {
        if seen.insert(node.id()) {
            out.push(XValue::Node(node));
        }
    };

    for value in input {
        let Some(node) = value.node() else {
            continue;
        };
        match step.axis {
            Axis::Child => {
                let candidates: Vec<_> = node
                    .children()
                    .filter(|c| matches_test(c, &step.test))
                    .collect();
                for c in filter_predicates(candidates, &step.predicates) {
                    push(c, &mut out);
                }
            }
            Axis::Descendant => {
                for d in node.descendants() {
                    let candidates: Vec<_> = d
                        .children()
                        .filter(|c| matches_test(c, &step.test))
                        .collect();
                    for c in filter_predicates(candidates, &step.predicates) {
                        push(c, &mut out);
                    }
                }
            }
            Axis::SelfNode => {
                if matches_test(&node, &step.test) {
                    for c in filter_predicates(vec![node], &step.predicates) {
                        push(c, &mut out);
                    }
                }
            }
            Axis::Parent => {
                if let Some(parent) = node.parent() {
                    for c in filter_predicates(vec![parent], &step.predicates) {
                        push(c, &mut out);
                    }
                }
            }
            Axis::Attribute => {
                if let Some(element) = node.value().as_element() {
                    match &step.test {
                        NodeTest::Name(name) => {
                            if let Some(v) = element.attr(name) {
                                out.push(XValue::Attr(v));
                            }
                        }
                        _ => out.extend(element.attrs().map(|(_, v)| XValue::Attr(v))),
                    }
                }
            }
        }
    }

    if step.axis == Axis::Descendant || input.len() > 1 {
        sort_document_order(&mut out);
    }
    out
}

fn sort_document_order(values: &mut [XValue<'_>]) {
    let Some(first) = values.iter().find_map(|v| v.node()) else {
        return;
    };
    let root = first.ancestors().last().unwrap_or(first);
    let order: HashMap<NodeId, usize> = root
        .descendants()
        .enumerate()
        .map(|(i, n)| (n.id(), i))
        .collect();
    values.sort_by_key(|v| v.node().and_then(|n| order.get(&n.id()).copied()).unwrap_or(usize::MAX));
}

fn filter_predicates<'a>(
    mut nodes: Vec<NodeRef<'a, Node>>,
    predicates: &[Predicate],
) -> Vec<NodeRef<'a, Node>> {
    for predicate in predicates {
        let size = nodes.len();
        nodes = nodes
            .into_iter()
            .enumerate()
            .filter(|(i, node)| predicate_holds(predicate, node, i + 1, size))
            .map(|(_, node)| node)
            .collect();
    }
    nodes
}

fn subject_value(subject: &Subject, node: &NodeRef<'_, Node>) -> Option<String> {
    match subject {
        Subject::Attr(name) => node
            .value()
            .as_element()
            .and_then(|e| e.attr(name))
            .map(String::from),
        Subject::Text => Some(string_value(*node)),
    }
}

fn predicate_holds(predicate: &Predicate, node: &NodeRef<'_, Node>, position: usize, size: usize) -> bool {
    match predicate {
        Predicate::Position(n) => position == *n,
        Predicate::Last => position == size,
        Predicate::Exists(subject) => subject_value(subject, node)
            .map(|v| !v.trim().is_empty() || matches!(subject, Subject::Attr(_)))
            .unwrap_or(false),
        Predicate::Compare { subject, op, value } => {
            let Some(actual) = subject_value(subject, node) else {
                return false;
            };
            match op {
                Op::Equals => actual.trim() == value,
                Op::Contains => actual.contains(value.as_str()),
                Op::StartsWith => actual.trim_start().starts_with(value.as_str()),
            }
        }
        Predicate::And(parts) => parts
            .iter()
            .all(|p| predicate_holds(p, node, position, size)),
    }
}

struct Parser<'s> {
    source: &'s str,
    chars: Vec<char>,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str) -> Self {
        let source = source.trim();
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: &str) -> GleanerError {
        GleanerError::XPath(format!("{} in '{}' at {}", message, self.source, self.pos))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_str(&self, s: &str) -> bool {
        let n = s.chars().count();
        self.chars.len() >= self.pos + n && self.chars[self.pos..self.pos + n].iter().copied().eq(s.chars())
    }

    fn parse(mut self) -> Result<XPath> {
        if self.chars.is_empty() {
            return Err(self.error("empty expression"));
        }

        let mut absolute = false;
        let mut axis = Axis::Child;
        if self.peek_str("//") {
            absolute = true;
            axis = Axis::Descendant;
            self.pos += 2;
        } else if self.peek_str("/") {
            absolute = true;
            self.pos += 1;
            if self.pos == self.chars.len() {
                return Ok(XPath {
                    source: self.source.to_string(),
                    absolute,
                    steps: Vec::new(),
                });
            }
        }

        let mut steps = Vec::new();
        loop {
            let step = self.parse_step(axis)?;
            let terminal = step.axis == Axis::Attribute;
            steps.push(step);

            if self.pos == self.chars.len() {
                break;
            }
            if terminal {
                return Err(self.error("attribute step must be last"));
            }
            if self.peek_str("//") {
                axis = Axis::Descendant;
                self.pos += 2;
            } else if self.peek_str("/") {
                axis = Axis::Child;
                self.pos += 1;
            } else {
                return Err(self.error("expected '/'"));
            }
        }

        Ok(XPath {
            source: self.source.to_string(),
            absolute,
            steps,
        })
    }

    fn parse_step(&mut self, axis: Axis) -> Result<Step> {
        if self.peek_str("..") {
            self.pos += 2;
            return self.finish_step(Axis::Parent, NodeTest::AnyNode);
        }
        if self.peek_str(".") {
            self.pos += 1;
            return self.finish_step(Axis::SelfNode, NodeTest::AnyNode);
        }
        if self.peek_str("@") {
            self.pos += 1;
            let test = if self.peek_str("*") {
                self.pos += 1;
                NodeTest::AnyElement
            } else {
                NodeTest::Name(self.parse_name()?)
            };
            if axis == Axis::Descendant {
                return Err(self.error("'//@' is not supported"));
            }
            return Ok(Step {
                axis: Axis::Attribute,
                test,
                predicates: Vec::new(),
            });
        }

        let test = if self.peek_str("*") {
            self.pos += 1;
            NodeTest::AnyElement
        } else {
            let name = self.parse_name()?;
            if self.peek_str("()") {
                self.pos += 2;
                match name.as_str() {
                    "text" => NodeTest::Text,
                    "node" => NodeTest::AnyNode,
                    other => return Err(self.error(&format!("unsupported node test {}()", other))),
                }
            } else {
                NodeTest::Name(name)
            }
        };
        self.finish_step(axis, test)
    }

    fn finish_step(&mut self, axis: Axis, test: NodeTest) -> Result<Step> {
        let mut predicates = Vec::new();
        while self.peek() == Some('[') {
            let body = self.take_bracketed()?;
            predicates.push(parse_predicate(&body).map_err(|m| self.error(&m))?);
        }
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_name(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == ':' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.error("expected a name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn take_bracketed(&mut self) -> Result<String> {
        // at '['
        self.pos += 1;
        let start = self.pos;
        let mut quote: Option<char> = None;
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '\'') | (None, '"') => quote = Some(c),
                (None, '[') => depth += 1,
                (None, ']') if depth == 0 => {
                    let body: String = self.chars[start..self.pos].iter().collect();
                    self.pos += 1;
                    return Ok(body);
                }
                (None, ']') => depth -= 1,
                _ => {}
            }
            self.pos += 1;
        }
        Err(self.error("unterminated predicate"))
    }
}

fn split_outside_quotes<'a>(s: &'a str, separator: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut skip_until = 0;
    for (i, c) in s.char_indices() {
        if i < skip_until {
            continue;
        }
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if s[i..].starts_with(separator) => {
                parts.push(&s[start..i]);
                start = i + separator.len();
                skip_until = start;
            }
            None => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_literal(s: &str) -> std::result::Result<String, String> {
    let s = s.trim();
    let quoted = (s.starts_with('\'') && s.ends_with('\'')) || (s.starts_with('"') && s.ends_with('"'));
    if s.len() >= 2 && quoted {
        Ok(s[1..s.len() - 1].to_string())
    } else {
        Err(format!("expected string literal, got {}", s))
    }
}

fn parse_subject(s: &str) -> std::result::Result<Subject, String> {
    let s = s.trim();
    if let Some(name) = s.strip_prefix('@') {
        if name.is_empty() {
            return Err("expected attribute name".into());
        }
        Ok(Subject::Attr(name.to_string()))
    } else if s == "text()" || s == "." || s == "normalize-space()" {
        Ok(Subject::Text)
    } else {
        Err(format!("unsupported predicate operand {}", s))
    }
}

fn parse_predicate(body: &str) -> std::result::Result<Predicate, String> {
    let body = body.trim();
    let conjuncts = split_outside_quotes(body, " and ");
    if conjuncts.len() > 1 {
        return conjuncts
            .into_iter()
            .map(parse_predicate)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Predicate::And);
    }

    if let Ok(n) = body.parse::<usize>() {
        if n == 0 {
            return Err("positions start at 1".into());
        }
        return Ok(Predicate::Position(n));
    }
    if body == "last()" {
        return Ok(Predicate::Last);
    }

    for (function, op) in [("contains(", Op::Contains), ("starts-with(", Op::StartsWith)] {
        if let Some(args) = body.strip_prefix(function).and_then(|r| r.strip_suffix(')')) {
            let args = split_outside_quotes(args, ",");
            if args.len() != 2 {
                return Err(format!("{}) takes two arguments", function));
            }
            return Ok(Predicate::Compare {
                subject: parse_subject(args[0])?,
                op,
                value: parse_literal(args[1])?,
            });
        }
    }

    let sides = split_outside_quotes(body, "=");
    match sides.as_slice() {
        [subject] => Ok(Predicate::Exists(parse_subject(subject)?)),
        [subject, value] => Ok(Predicate::Compare {
            subject: parse_subject(subject)?,
            op: Op::Equals,
            value: parse_literal(value)?,
        }),
        _ => Err(format!("unsupported predicate {}", body)),
    }
}

/// Absolute path to `node`, with positions where siblings share the name.
pub fn path_to(node: NodeRef<'_, Node>) -> String {
    let mut steps: Vec<String> = node
        .ancestors()
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .chain(std::iter::once(node))
        .filter_map(|n| step_for(&n))
        .collect();
    if steps.is_empty() {
        return "/".to_string();
    }
    steps.insert(0, String::new());
    steps.join("/")
}

/// Path from `ancestor` down to `node`, e.g. `./h2/a`. `.` when they are the same.
pub fn relative_path(ancestor: NodeRef<'_, Node>, node: NodeRef<'_, Node>) -> Option<String> {
    if ancestor.id() == node.id() {
        return Some(".".to_string());
    }
    let mut steps = Vec::new();
    let mut current = node;
    loop {
        steps.push(step_for(&current)?);
        let parent = current.parent()?;
        if parent.id() == ancestor.id() {
            break;
        }
        current = parent;
    }
    steps.reverse();
    Some(format!("./{}", steps.join("/")))
}

fn step_for(node: &NodeRef<'_, Node>) -> Option<String> {
    let name = node.value().as_element()?.name();
    let same_named = |n: &NodeRef<'_, Node>| {
        n.value()
            .as_element()
            .map(|e| e.name() == name)
            .unwrap_or(false)
    };
    let before = node.prev_siblings().filter(same_named).count();
    let after = node.next_siblings().filter(same_named).count();
    if before + after == 0 {
        Some(name.to_string())
    } else {
        Some(format!("{}[{}]", name, before + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_document;

    const PAGE: &str = r#"<html><head><title>T</title></head><body>
        <div id="main" class="content wide">
          <h1>Hello</h1>
          <ul>
            <li><a href="/a">A</a></li>
            <li class="x"><a href="/b">B</a></li>
            <li><a href="/c">C</a><span>extra</span></li>
          </ul>
        </div>
        <p>World</p>
      </body></html>"#;

    fn strings(expr: &str) -> Vec<String> {
        let doc = parse_document(PAGE);
        XPath::parse(expr)
            .unwrap()
            .evaluate(doc.tree.root())
            .iter()
            .map(|v| v.string())
            .collect()
    }

    #[test]
    fn test_descendant_name_test() {
        assert_eq!(strings("//h1"), vec!["Hello"]);
        assert_eq!(strings("//li"), vec!["A", "B", "C\nextra"]);
    }

    #[test]
    fn test_absolute_child_path() {
        assert_eq!(strings("/html/body/p"), vec!["World"]);
        assert!(strings("/body").is_empty());
    }

    #[test]
    fn test_root_path_selects_document() {
        let doc = parse_document(PAGE);
        let nodes = XPath::parse("/").unwrap().nodes(doc.tree.root());
        assert_eq!(nodes.len(), 1);
        assert!(matches!(nodes[0].value(), Node::Document));
    }

    #[test]
    fn test_positional_predicates() {
        assert_eq!(strings("//li[2]"), vec!["B"]);
        assert_eq!(strings("//li[last()]/a"), vec!["C"]);
    }

    #[test]
    fn test_attribute_predicates() {
        assert_eq!(strings("//li[@class='x']/a"), vec!["B"]);
        assert_eq!(strings("//div[@id]/h1"), vec!["Hello"]);
        assert_eq!(strings("//div[contains(@class, 'wide')]/h1"), vec!["Hello"]);
        assert_eq!(strings("//li[contains(text(), 'C') and @class]"), Vec::<String>::new());
    }

    #[test]
    fn test_attribute_step() {
        assert_eq!(strings("//li/a/@href"), vec!["/a", "/b", "/c"]);
    }

    #[test]
    fn test_text_step() {
        assert_eq!(strings("//li[3]/a/text()"), vec!["C"]);
    }

    #[test]
    fn test_relative_evaluation() {
        let doc = parse_document(PAGE);
        let items = XPath::parse("//li").unwrap().nodes(doc.tree.root());
        let link = XPath::parse("./a/@href").unwrap();
        let hrefs: Vec<_> = items.iter().filter_map(|li| link.first_string(*li)).collect();
        assert_eq!(hrefs, vec!["/a", "/b", "/c"]);

        let parent = XPath::parse("..").unwrap().first_node(items[0]).unwrap();
        assert_eq!(parent.value().as_element().unwrap().name(), "ul");
    }

    #[test]
    fn test_document_order_for_nested_matches() {
        let doc = parse_document("<div><section><b>1</b></section><b>2</b></div>");
        let values: Vec<_> = XPath::parse("//div//b")
            .unwrap()
            .evaluate(doc.tree.root())
            .iter()
            .map(|v| v.string())
            .collect();
        assert_eq!(values, vec!["1", "2"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(XPath::parse("").is_err());
        assert!(XPath::parse("//li[").is_err());
        assert!(XPath::parse("//li[0]").is_err());
        assert!(XPath::parse("//a/@href/b").is_err());
        assert!(XPath::parse("//foo()").is_err());
    }

    #[test]
    fn test_generated_paths_round_trip() {
        let doc = parse_document(PAGE);
        let items = XPath::parse("//li").unwrap().nodes(doc.tree.root());
        let path = path_to(items[1]);
        assert_eq!(path, "/html/body/div/ul/li[2]");
        let back = XPath::parse(&path).unwrap().first_node(doc.tree.root()).unwrap();
        assert_eq!(back.id(), items[1].id());

        let anchor = XPath::parse("./a").unwrap().first_node(items[1]).unwrap();
        assert_eq!(relative_path(items[1], anchor).as_deref(), Some("./a"));
        assert_eq!(relative_path(items[1], items[1]).as_deref(), Some("."));
    }
}
