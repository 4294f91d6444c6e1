//! Static schema validation and the resolved schema registry.
//!
//! Validation runs once per schema, independent of any message. For every point
//! between fields it computes a [`BitLengthSet`]: the smallest and largest
//! possible cumulative bit offset together with the offsets' residues modulo a
//! working modulus. Declared [`Assertion`]s are evaluated against these sets.
//!
//! Schemas reference each other by name, so a schema can (by mistake) contain
//! itself. Such cycles would make the serialized size unbounded and are
//! rejected before any layout is computed.

use crate::codec::CodecError;
use crate::cursor::align_up;
use crate::schema::{Assertion, Schema, TypeDescriptor};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Upper bound on any schema's bit length and on assertion moduli.
pub const MAX_BIT_LENGTH: u64 = u32::MAX as u64;
pub const MAX_ASSERTION_MODULUS: u64 = 4096;

/// Width of the byte-length header preceding a nested extensible composite.
pub const DELIMITER_HEADER_BITS: u32 = 32;

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}

/// Set of possible bit offsets, tracked per residue class modulo `modulus`.
///
/// Each class keeps the smallest and largest offset in it. The modulus is always a
/// multiple of 8 so that padding to a byte boundary maps classes to classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitLengthSet {
    modulus: u64,
    classes: BTreeMap<u64, (u64, u64)>,
}

impl BitLengthSet {
    /// The single offset `bits`. `modulus` is rounded up to a multiple of 8.
    pub fn fixed(bits: u64, modulus: u64) -> Self {
        let modulus = lcm(modulus.max(1), 8);
        let mut classes = BTreeMap::new();
        classes.insert(bits % modulus, (bits, bits));
        BitLengthSet { modulus, classes }
    }

    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    pub fn min(&self) -> u64 {
        self.classes.values().map(|&(lo, _)| lo).min().unwrap_or(0)
    }

    pub fn max(&self) -> u64 {
        self.classes.values().map(|&(_, hi)| hi).max().unwrap_or(0)
    }

    pub fn is_fixed(&self) -> bool {
        self.min() == self.max()
    }

    /// Residues of all offsets modulo `m`, where `m` divides the working modulus.
    pub fn residues(&self, m: u64) -> BTreeSet<u64> {
        self.classes.keys().map(|r| r % m).collect()
    }

    fn insert(&mut self, residue: u64, lo: u64, hi: u64) {
        self.classes
            .entry(residue)
            .and_modify(|(a, b)| {
                *a = (*a).min(lo);
                *b = (*b).max(hi);
            })
            .or_insert((lo, hi));
    }

    fn empty(modulus: u64) -> Self {
        BitLengthSet {
            modulus,
            classes: BTreeMap::new(),
        }
    }

    pub fn union(&self, other: &BitLengthSet) -> BitLengthSet {
        let mut out = self.clone();
        for (&r, &(lo, hi)) in &other.classes {
            out.insert(r, lo, hi);
        }
        out
    }

    pub fn shift(&self, bits: u64) -> BitLengthSet {
        let mut out = BitLengthSet::empty(self.modulus);
        for (&r, &(lo, hi)) in &self.classes {
            out.insert(
                (r + bits % self.modulus) % self.modulus,
                lo.saturating_add(bits),
                hi.saturating_add(bits),
            );
        }
        out
    }

    /// Sumset: every offset of `self` followed by every length of `other`.
    pub fn concat(&self, other: &BitLengthSet) -> BitLengthSet {
        let mut out = BitLengthSet::empty(self.modulus);
        for (&r, &(lo, hi)) in &self.classes {
            for (&s, &(lo2, hi2)) in &other.classes {
                out.insert(
                    (r + s) % self.modulus,
                    lo.saturating_add(lo2),
                    hi.saturating_add(hi2),
                );
            }
        }
        out
    }

    /// Pads every offset up to a multiple of `n`; `n` must divide the modulus.
    pub fn align(&self, n: u64) -> BitLengthSet {
        if n <= 1 {
            return self.clone();
        }
        let mut out = BitLengthSet::empty(self.modulus);
        for (&r, &(lo, hi)) in &self.classes {
            let pad = align_up(r, n) - r;
            out.insert(
                (r + pad) % self.modulus,
                lo.saturating_add(pad),
                hi.saturating_add(pad),
            );
        }
        out
    }

    /// `count`-fold sumset of a length set (`{0}` for zero).
    pub fn repeat(&self, count: u64) -> BitLengthSet {
        let mut result = BitLengthSet::fixed(0, self.modulus);
        let mut base = self.clone();
        let mut n = count;
        while n > 0 {
            if n & 1 == 1 {
                result = result.concat(&base);
            }
            n >>= 1;
            if n > 0 {
                base = base.concat(&base);
            }
        }
        result
    }

    /// Union of the 0- to `count`-fold sumsets.
    pub fn repeat_up_to(&self, count: u64) -> BitLengthSet {
        self.union(&BitLengthSet::fixed(0, self.modulus)).repeat(count)
    }
}

/// Statically known bit length bounds of a schema's own fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaLayout {
    pub min_bits: u64,
    pub max_bits: u64,
}

impl SchemaLayout {
    pub fn fixed_bits(&self) -> Option<u64> {
        (self.min_bits == self.max_bits).then_some(self.max_bits)
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedSchema {
    pub schema: Schema,
    pub layout: SchemaLayout,
}

impl ResolvedSchema {
    /// Buffer bound for one serialized message: the byte-padded fixed length for
    /// sealed schemas, the extent otherwise.
    pub fn capacity_bits(&self) -> u64 {
        match self.schema.extent_bits {
            Some(extent) if !self.schema.sealed => u64::from(extent),
            _ => align_up(self.layout.max_bits, 8),
        }
    }
}

/// Checks a set of schemas that may reference each other by name.
pub struct Validator<'a> {
    schemas: HashMap<&'a str, &'a Schema>,
}

impl<'a> Validator<'a> {
    pub fn new(schemas: impl IntoIterator<Item = &'a Schema>) -> Result<Self, CodecError> {
        let mut by_name = HashMap::new();
        for s in schemas {
            if by_name.insert(s.name.as_str(), s).is_some() {
                return Err(CodecError::InvalidSchema {
                    schema: s.name.clone(),
                    reason: "duplicate schema name".to_string(),
                });
            }
        }
        Ok(Validator { schemas: by_name })
    }

    fn lookup(&self, name: &str) -> Option<&'a Schema> {
        self.schemas.get(name).copied()
    }

    /// Rejects schemas that contain themselves through composite fields.
    pub fn check_cycles(&self) -> Result<(), CodecError> {
        let mut names: Vec<&str> = self.schemas.keys().copied().collect();
        names.sort_unstable();
        let mut done = BTreeSet::new();
        for name in names {
            let mut stack = Vec::new();
            self.visit(name, &mut stack, &mut done)?;
        }
        Ok(())
    }

    fn visit(
        &self,
        name: &'a str,
        stack: &mut Vec<&'a str>,
        done: &mut BTreeSet<&'a str>,
    ) -> Result<(), CodecError> {
        if done.contains(name) {
            return Ok(());
        }
        if let Some(start) = stack.iter().position(|&s| s == name) {
            let mut path: Vec<&str> = stack[start..].to_vec();
            path.push(name);
            return Err(CodecError::SchemaAssertionViolation {
                schema: name.to_string(),
                assertion: "no self-reference".to_string(),
                computed: path.join(" -> "),
            });
        }
        let Some(schema) = self.lookup(name) else {
            return Ok(());
        };
        stack.push(name);
        for field in &schema.fields {
            for dep in composite_refs(&field.descriptor) {
                self.visit(dep, stack, done)?;
            }
        }
        stack.pop();
        done.insert(name);
        Ok(())
    }

    /// Full validation of one schema. Requires [`check_cycles`](Self::check_cycles) to have passed.
    pub fn validate(&self, name: &str) -> Result<SchemaLayout, CodecError> {
        let schema = self
            .lookup(name)
            .ok_or_else(|| CodecError::UnknownSchema(name.to_string()))?;
        self.check_structure(schema)?;

        let body = self.advance_fields(&BitLengthSet::fixed(0, 8), &schema.fields);
        let layout = SchemaLayout {
            min_bits: body.min(),
            max_bits: body.max(),
        };
        if layout.max_bits > MAX_BIT_LENGTH {
            return Err(invalid(schema, format!("maximum length of {} bits is too large", layout.max_bits)));
        }

        for placed in &schema.assertions {
            self.check_assertion(schema, placed.position, &placed.assertion)?;
        }

        if schema.sealed {
            if schema.extent_bits.is_some() {
                return Err(invalid(schema, "sealed schema cannot declare an extent".to_string()));
            }
            if layout.fixed_bits().is_none() {
                return Err(CodecError::SchemaAssertionViolation {
                    schema: schema.name.clone(),
                    assertion: "sealed length is fixed".to_string(),
                    computed: format!("{}..={} bits", layout.min_bits, layout.max_bits),
                });
            }
        } else {
            let extent = schema
                .extent_bits
                .ok_or_else(|| invalid(schema, "extensible schema must declare an extent".to_string()))?;
            if extent % 8 != 0 {
                return Err(invalid(schema, format!("extent of {} bits is not a whole number of bytes", extent)));
            }
            if layout.max_bits > u64::from(extent) {
                return Err(CodecError::SchemaAssertionViolation {
                    schema: schema.name.clone(),
                    assertion: format!("_offset_.max <= extent ({})", extent),
                    computed: layout.max_bits.to_string(),
                });
            }
        }
        Ok(layout)
    }

    /// Validates every schema `name` references, directly or through other
    /// schemas, then `name` itself. Requires [`check_cycles`](Self::check_cycles) to have passed.
    pub fn validate_with_dependencies(&self, name: &str) -> Result<SchemaLayout, CodecError> {
        let root = self
            .lookup(name)
            .ok_or_else(|| CodecError::UnknownSchema(name.to_string()))?;
        let mut seen = BTreeSet::new();
        let mut pending = schema_refs(root);
        while let Some(dep) = pending.pop() {
            if dep == name || !seen.insert(dep) {
                continue;
            }
            // Unknown references are reported by the referencing schema.
            if let Some(schema) = self.lookup(dep) {
                self.validate(dep)?;
                pending.extend(schema_refs(schema));
            }
        }
        self.validate(name)
    }

    fn check_structure(&self, schema: &Schema) -> Result<(), CodecError> {
        let mut seen = BTreeSet::new();
        for field in &schema.fields {
            if !field.descriptor.is_void() {
                if field.name.is_empty() {
                    return Err(invalid(schema, "field name is empty".to_string()));
                }
                if !seen.insert(field.name.as_str()) {
                    return Err(invalid(schema, format!("duplicate field name {}", field.name)));
                }
            }
            self.check_descriptor(schema, &field.name, &field.descriptor, false)?;
        }
        for placed in &schema.assertions {
            if placed.position > schema.fields.len() {
                return Err(invalid(schema, format!("assertion `{}` placed past the last field", placed.assertion)));
            }
            if let Assertion::OffsetModulo { modulus, .. } = placed.assertion {
                if modulus == 0 || modulus > MAX_ASSERTION_MODULUS {
                    return Err(invalid(
                        schema,
                        format!("assertion modulus {} outside 1..={}", modulus, MAX_ASSERTION_MODULUS),
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_descriptor(
        &self,
        schema: &Schema,
        field: &str,
        d: &TypeDescriptor,
        in_array: bool,
    ) -> Result<(), CodecError> {
        let bad = |reason: String| invalid(schema, format!("field {}: {}", field, reason));
        match d {
            TypeDescriptor::Bool => Ok(()),
            TypeDescriptor::UInt(w) | TypeDescriptor::Int(w) | TypeDescriptor::TruncatedUInt(w) => {
                if (1..=64).contains(w) {
                    Ok(())
                } else {
                    Err(bad(format!("integer width {} outside 1..=64", w)))
                }
            }
            TypeDescriptor::Void(w) => {
                if in_array {
                    Err(bad("array of void".to_string()))
                } else if (1..=64).contains(w) {
                    Ok(())
                } else {
                    Err(bad(format!("void width {} outside 1..=64", w)))
                }
            }
            TypeDescriptor::Float(w) => match *w {
                32 | 64 => Ok(()),
                _ => Err(bad(format!("float width {} is not 32 or 64", w))),
            },
            TypeDescriptor::FixedArray(elem, count) => {
                if *count == 0 {
                    return Err(bad("fixed array count is zero".to_string()));
                }
                self.check_descriptor(schema, field, elem, true)
            }
            TypeDescriptor::VariableArray(elem, max) => {
                if *max == 0 {
                    return Err(bad("variable array capacity is zero".to_string()));
                }
                self.check_descriptor(schema, field, elem, true)
            }
            TypeDescriptor::Composite(name) => match self.lookup(name) {
                Some(_) => Ok(()),
                None => Err(bad(format!("unknown composite type {}", name))),
            },
        }
    }

    fn check_assertion(&self, schema: &Schema, position: usize, assertion: &Assertion) -> Result<(), CodecError> {
        let modulus = match assertion {
            Assertion::OffsetModulo { modulus, .. } => *modulus,
            _ => 8,
        };
        let offset = self.advance_fields(&BitLengthSet::fixed(0, modulus), &schema.fields[..position]);
        let (ok, computed) = match assertion {
            Assertion::OffsetModulo { modulus, residues } => {
                let actual = offset.residues(*modulus);
                let rs: Vec<String> = actual.iter().map(|r| r.to_string()).collect();
                (actual.is_subset(residues), format!("{{{}}}", rs.join(", ")))
            }
            Assertion::MaxOffsetAtMost(n) => (offset.max() <= *n, offset.max().to_string()),
            Assertion::MaxOffsetEquals(n) => (offset.max() == *n, offset.max().to_string()),
        };
        if ok {
            Ok(())
        } else {
            Err(CodecError::SchemaAssertionViolation {
                schema: schema.name.clone(),
                assertion: assertion.to_string(),
                computed,
            })
        }
    }

    fn advance_fields(&self, start: &BitLengthSet, fields: &[crate::schema::Field]) -> BitLengthSet {
        fields
            .iter()
            .fold(start.clone(), |offset, f| self.advance(&offset, &f.descriptor))
    }

    /// Offsets reachable after one occurrence of `d` starting from any offset in `offset`.
    fn advance(&self, offset: &BitLengthSet, d: &TypeDescriptor) -> BitLengthSet {
        let modulus = offset.modulus();
        match d {
            TypeDescriptor::Bool => offset.shift(1),
            TypeDescriptor::UInt(w)
            | TypeDescriptor::Int(w)
            | TypeDescriptor::TruncatedUInt(w)
            | TypeDescriptor::Float(w)
            | TypeDescriptor::Void(w) => offset.shift(u64::from(*w)),
            TypeDescriptor::FixedArray(elem, count) => {
                if self.is_offset_independent(elem) {
                    let one = self.advance(&BitLengthSet::fixed(0, modulus), elem);
                    offset.concat(&one.repeat(*count))
                } else {
                    let mut cur = offset.clone();
                    for _ in 0..*count {
                        cur = self.advance(&cur, elem);
                    }
                    cur
                }
            }
            TypeDescriptor::VariableArray(elem, max) => {
                let after_prefix = offset.shift(u64::from(TypeDescriptor::length_prefix_bits(*max)));
                if self.is_offset_independent(elem) {
                    let one = self.advance(&BitLengthSet::fixed(0, modulus), elem);
                    after_prefix.concat(&one.repeat_up_to(*max))
                } else {
                    let mut acc = after_prefix.clone();
                    let mut cur = after_prefix;
                    for _ in 0..*max {
                        cur = self.advance(&cur, elem);
                        acc = acc.union(&cur);
                    }
                    acc
                }
            }
            TypeDescriptor::Composite(name) => {
                let Some(nested) = self.lookup(name) else {
                    return offset.clone();
                };
                let start = offset.align(u64::from(nested.alignment_bits()));
                if nested.sealed {
                    self.advance_fields(&start, &nested.fields)
                } else {
                    let extent_bytes = u64::from(nested.extent_bits.unwrap_or(0) / 8);
                    start
                        .shift(u64::from(DELIMITER_HEADER_BITS))
                        .concat(&BitLengthSet::fixed(8, modulus).repeat_up_to(extent_bytes))
                }
            }
        }
    }

    /// True when the bits `d` occupies do not depend on where it starts.
    fn is_offset_independent(&self, d: &TypeDescriptor) -> bool {
        match d {
            TypeDescriptor::FixedArray(elem, _) | TypeDescriptor::VariableArray(elem, _) => {
                self.is_offset_independent(elem)
            }
            TypeDescriptor::Composite(name) => match self.lookup(name) {
                Some(nested) if nested.byte_aligned => false,
                Some(nested) if nested.sealed => nested
                    .fields
                    .iter()
                    .all(|f| self.is_offset_independent(&f.descriptor)),
                _ => true,
            },
            _ => true,
        }
    }
}

fn invalid(schema: &Schema, reason: String) -> CodecError {
    CodecError::InvalidSchema {
        schema: schema.name.clone(),
        reason,
    }
}

fn schema_refs(schema: &Schema) -> Vec<&str> {
    schema
        .fields
        .iter()
        .flat_map(|f| composite_refs(&f.descriptor))
        .collect()
}

fn composite_refs(d: &TypeDescriptor) -> Vec<&str> {
    match d {
        TypeDescriptor::Composite(name) => vec![name.as_str()],
        TypeDescriptor::FixedArray(elem, _) | TypeDescriptor::VariableArray(elem, _) => composite_refs(elem),
        _ => Vec::new(),
    }
}

/// Validate one schema of `schemas` by name, together with every schema it
/// references. Pure: the same inputs always give the same result.
pub fn validate_schema(schemas: &[Schema], name: &str) -> Result<SchemaLayout, CodecError> {
    let validator = Validator::new(schemas)?;
    validator.check_cycles()?;
    validator.validate_with_dependencies(name)
}

/// Validated, immutable set of schemas, looked up by name.
#[derive(Debug, Clone)]
pub struct Registry {
    schemas: Vec<ResolvedSchema>,
    by_name: HashMap<String, usize>,
}

impl Registry {
    /// Validate every schema and index them. Fails on the first invalid schema.
    pub fn resolve(schemas: Vec<Schema>) -> Result<Self, CodecError> {
        let layouts = {
            let validator = Validator::new(&schemas)?;
            validator.check_cycles()?;
            schemas
                .iter()
                .map(|s| validator.validate(&s.name))
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut resolved = Vec::with_capacity(schemas.len());
        let mut by_name = HashMap::new();
        for (i, (schema, layout)) in schemas.into_iter().zip(layouts).enumerate() {
            log::debug!(
                "resolved schema {} ({}): {}..={} bits",
                schema.name,
                if schema.sealed { "sealed" } else { "extensible" },
                layout.min_bits,
                layout.max_bits
            );
            by_name.insert(schema.name.clone(), i);
            resolved.push(ResolvedSchema { schema, layout });
        }
        Ok(Registry {
            schemas: resolved,
            by_name,
        })
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedSchema> {
        self.by_name.get(name).map(|&i| &self.schemas[i])
    }

    pub fn require(&self, name: &str) -> Result<&ResolvedSchema, CodecError> {
        self.get(name)
            .ok_or_else(|| CodecError::UnknownSchema(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.iter().map(|s| s.schema.name.as_str())
    }

    /// Re-run validation of a resolved schema; always yields its cached layout.
    pub fn validate(&self, name: &str) -> Result<SchemaLayout, CodecError> {
        let validator = Validator::new(self.schemas.iter().map(|s| &s.schema))?;
        validator.check_cycles()?;
        validator.validate_with_dependencies(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_set() {
        let s = BitLengthSet::fixed(13, 8);
        assert_eq!(s.min(), 13);
        assert_eq!(s.max(), 13);
        assert!(s.is_fixed());
        assert_eq!(s.residues(8), [5].into_iter().collect());
    }

    #[test]
    fn repeat_up_to_bytes() {
        let bytes = BitLengthSet::fixed(8, 8).repeat_up_to(45);
        assert_eq!(bytes.min(), 0);
        assert_eq!(bytes.max(), 360);
        assert_eq!(bytes.residues(8), [0].into_iter().collect());
    }

    #[test]
    fn var_array_prefix_residues() {
        // 6-bit prefix followed by 0..=45 bytes: offsets are 6 + 8k.
        let s = BitLengthSet::fixed(0, 8)
            .shift(6)
            .concat(&BitLengthSet::fixed(8, 8).repeat_up_to(45));
        assert_eq!(s.residues(8), [6].into_iter().collect());
        assert_eq!(s.min(), 6);
        assert_eq!(s.max(), 366);
        assert_eq!(s.align(8).residues(8), [0].into_iter().collect());
        assert_eq!(s.align(8).max(), 368);
    }

    #[test]
    fn odd_elements_spread_residues() {
        let s = BitLengthSet::fixed(3, 8).repeat_up_to(2);
        assert_eq!(s.residues(8), [0, 3, 6].into_iter().collect());
        let s = BitLengthSet::fixed(3, 8).repeat(3);
        assert!(s.is_fixed());
        assert_eq!(s.max(), 9);
    }

    #[test]
    fn modulus_is_multiple_of_eight() {
        assert_eq!(BitLengthSet::fixed(0, 3).modulus(), 24);
        assert_eq!(BitLengthSet::fixed(0, 16).modulus(), 16);
    }
}
