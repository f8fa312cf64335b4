/*
 * Copyright (c) 2021 gematik GmbH
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *    http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

use std::collections::HashMap;
use std::str::from_utf8;

use quick_xml::{events::Event, Reader};

use crate::Error;

/* Document */

#[derive(Debug, Clone)]
pub struct Document {
    root: Element,
}

impl Document {
    pub fn parse(xml: &str) -> Result<Self, Error> {
        let root = parse_root(xml)?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    pub fn into_root(self) -> Element {
        self.root
    }
}

impl ToString for Document {
    fn to_string(&self) -> String {
        self.root.to_string()
    }
}

/* Element */

#[derive(Debug, Clone)]
pub struct Element {
    prefix: Option<String>,
    name: String,
    ns_href: Option<String>,
    attributes: Vec<Attribute>,
    children: Vec<XmlNode>,
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub prefix: Option<String>,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub enum XmlNode {
    Element(Element),
    Text(String),
}

impl Attribute {
    pub fn qname(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.name),
            None => self.name.clone(),
        }
    }

    pub fn is_namespace_decl(&self) -> bool {
        (self.prefix.is_none() && self.name == "xmlns")
            || self.prefix.as_deref() == Some("xmlns")
    }
}

impl Element {
    pub fn new(qname: &str) -> Self {
        let (prefix, name) = split_qname(qname);

        Self {
            prefix,
            name,
            ns_href: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn qname(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.name),
            None => self.name.clone(),
        }
    }

    pub fn ns_href(&self) -> Option<&str> {
        self.ns_href.as_deref()
    }

    pub fn set_ns_href(&mut self, href: &str) {
        self.ns_href = Some(href.into());
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attr(&self, qname: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.qname() == qname)
            .map(|a| a.value.as_str())
    }

    pub fn set_attr(&mut self, qname: &str, value: &str) {
        if qname == "xmlns" {
            self.ns_href = Some(value.into());
        }

        if let Some(attr) = self.attributes.iter_mut().find(|a| a.qname() == qname) {
            attr.value = value.into();

            return;
        }

        let (prefix, name) = split_qname(qname);

        self.attributes.push(Attribute {
            prefix,
            name,
            value: value.into(),
        });
    }

    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    pub fn add_child(&mut self, child: Element) -> &mut Self {
        self.children.push(XmlNode::Element(child));

        self
    }

    pub fn add_text(&mut self, text: &str) -> &mut Self {
        self.children.push(XmlNode::Text(text.into()));

        self
    }

    pub fn insert_child(&mut self, index: usize, child: Element) {
        let index = element_index(&self.children, index);

        self.children.insert(index, XmlNode::Element(child));
    }

    pub fn remove_children(&mut self, name: &str, ns_href: &str) {
        self.children.retain(|node| match node {
            XmlNode::Element(e) => !(e.name == name && e.ns_href.as_deref() == Some(ns_href)),
            _ => true,
        });
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Concatenated direct text content of this element.
    pub fn text(&self) -> String {
        let mut ret = String::new();

        for node in &self.children {
            if let XmlNode::Text(text) = node {
                ret.push_str(text);
            }
        }

        ret
    }

    /// Depth first search over this element and all of its descendants.
    pub fn search<F>(&self, f: &mut F) -> Option<&Element>
    where
        F: FnMut(&Element) -> bool,
    {
        if f(self) {
            return Some(self);
        }

        for child in self.child_elements() {
            if let Some(found) = child.search(f) {
                return Some(found);
            }
        }

        None
    }

    pub fn find_element(&self, name: &str, ns_href: &str) -> Option<&Element> {
        self.search(&mut |e| e.name == name && e.ns_href.as_deref() == Some(ns_href))
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        self.search(&mut |e| e.attr("ID") == Some(id) || e.attr("Id") == Some(id))
    }

    fn write_into(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.qname());

        for attr in &self.attributes {
            out.push(' ');
            out.push_str(&attr.qname());
            out.push_str("=\"");
            out.push_str(&escape_attr(&attr.value));
            out.push('"');
        }

        if self.children.is_empty() {
            out.push_str("/>");

            return;
        }

        out.push('>');

        for child in &self.children {
            match child {
                XmlNode::Element(e) => e.write_into(out),
                XmlNode::Text(text) => out.push_str(&escape_text(text)),
            }
        }

        out.push_str("</");
        out.push_str(&self.qname());
        out.push('>');
    }
}

impl ToString for Element {
    fn to_string(&self) -> String {
        let mut ret = String::new();

        self.write_into(&mut ret);

        ret
    }
}

/* Parsing */

fn parse_root(xml: &str) -> Result<Element, Error> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut scopes: Vec<HashMap<String, String>> = vec![default_scope()];
    let mut root: Option<Element> = None;

    loop {
        let event = reader.read_event(&mut buf)?;

        match event {
            Event::Start(ref e) => {
                let element = begin_element(&reader, e.name(), e.attributes(), &mut scopes)?;

                stack.push(element);
            }
            Event::Empty(ref e) => {
                let element = begin_element(&reader, e.name(), e.attributes(), &mut scopes)?;

                scopes.pop();

                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                scopes.pop();

                let element = stack
                    .pop()
                    .ok_or_else(|| Error::MalformedXml("unexpected closing tag".into()))?;

                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(ref t) => {
                if let Some(parent) = stack.last_mut() {
                    let text = t
                        .unescaped()
                        .map_err(Error::XmlError)
                        .and_then(|v| decode(&v))?;

                    parent.children.push(XmlNode::Text(text));
                }
            }
            Event::CData(ref t) => {
                if let Some(parent) = stack.last_mut() {
                    let text = decode(t)?;

                    parent.children.push(XmlNode::Text(text));
                }
            }
            Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => (),
            Event::Eof => break,
        }

        buf.clear();
    }

    if !stack.is_empty() {
        return Err(Error::MalformedXml("unexpected end of document".into()));
    }

    root.ok_or_else(|| Error::MalformedXml("document has no root element".into()))
}

fn begin_element(
    reader: &Reader<&[u8]>,
    name: &[u8],
    attributes: quick_xml::events::attributes::Attributes,
    scopes: &mut Vec<HashMap<String, String>>,
) -> Result<Element, Error> {
    let qname = decode(name)?;
    let (prefix, name) = split_qname(&qname);

    let mut attrs = Vec::new();
    let mut scope = HashMap::new();

    for attr in attributes {
        let attr = attr.map_err(Error::XmlError)?;
        let key = decode(attr.key)?;
        let value = attr
            .unescape_and_decode_value(reader)
            .map_err(Error::XmlError)?;
        let (attr_prefix, attr_name) = split_qname(&key);

        if attr_prefix.is_none() && attr_name == "xmlns" {
            scope.insert(String::new(), value.clone());
        } else if attr_prefix.as_deref() == Some("xmlns") {
            scope.insert(attr_name.clone(), value.clone());
        }

        attrs.push(Attribute {
            prefix: attr_prefix,
            name: attr_name,
            value,
        });
    }

    scopes.push(scope);

    let ns_href = resolve_ns(scopes, prefix.as_deref());

    Ok(Element {
        prefix,
        name,
        ns_href,
        attributes: attrs,
        children: Vec::new(),
    })
}

fn attach(
    stack: &mut Vec<Element>,
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), Error> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(XmlNode::Element(element));

            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);

            Ok(())
        }
        None => Err(Error::MalformedXml(
            "document has more than one root element".into(),
        )),
    }
}

fn resolve_ns(scopes: &[HashMap<String, String>], prefix: Option<&str>) -> Option<String> {
    let key = prefix.unwrap_or("");

    for scope in scopes.iter().rev() {
        if let Some(href) = scope.get(key) {
            if href.is_empty() {
                return None;
            }

            return Some(href.clone());
        }
    }

    None
}

fn default_scope() -> HashMap<String, String> {
    let mut scope = HashMap::new();

    scope.insert("xml".into(), "http://www.w3.org/XML/1998/namespace".into());

    scope
}

fn split_qname(qname: &str) -> (Option<String>, String) {
    match qname.find(':') {
        Some(pos) => (Some(qname[..pos].into()), qname[pos + 1..].into()),
        None => (None, qname.into()),
    }
}

fn element_index(children: &[XmlNode], index: usize) -> usize {
    let mut seen = 0;

    for (i, node) in children.iter().enumerate() {
        if seen == index {
            return i;
        }

        if let XmlNode::Element(_) = node {
            seen += 1;
        }
    }

    children.len()
}

fn decode(data: &[u8]) -> Result<String, Error> {
    from_utf8(data)
        .map(Into::into)
        .map_err(|_| Error::MalformedXml("document contains invalid UTF-8".into()))
}

pub(crate) fn escape_text(value: &str) -> String {
    let mut ret = String::with_capacity(value.len());

    for c in value.chars() {
        match c {
            '&' => ret.push_str("&amp;"),
            '<' => ret.push_str("&lt;"),
            '>' => ret.push_str("&gt;"),
            '\r' => ret.push_str("&#xD;"),
            c => ret.push(c),
        }
    }

    ret
}

pub(crate) fn escape_attr(value: &str) -> String {
    let mut ret = String::with_capacity(value.len());

    for c in value.chars() {
        match c {
            '&' => ret.push_str("&amp;"),
            '<' => ret.push_str("&lt;"),
            '"' => ret.push_str("&quot;"),
            '\t' => ret.push_str("&#x9;"),
            '\n' => ret.push_str("&#xA;"),
            '\r' => ret.push_str("&#xD;"),
            c => ret.push(c),
        }
    }

    ret
}
