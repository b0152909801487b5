//! Resource descriptors and the per-thread registry.

use coramc_utils::{clog2, gcd, CoramResult, Error, Id};
use linked_hash_map::LinkedHashMap;
use std::collections::HashMap;

/// Widest transfer the external bus supports, in bits.
pub const EXT_MAX_DATAWIDTH: u64 = 512;

/// The seven abstract hardware resource kinds a control thread can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Memory,
    InStream,
    OutStream,
    Channel,
    Register,
    IoChannel,
    IoRegister,
}

impl ResourceKind {
    /// The constructor name in source programs, also the signal prefix stem.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Memory => "memory",
            ResourceKind::InStream => "instream",
            ResourceKind::OutStream => "outstream",
            ResourceKind::Channel => "channel",
            ResourceKind::Register => "register",
            ResourceKind::IoChannel => "iochannel",
            ResourceKind::IoRegister => "ioregister",
        }
    }

    pub fn from_constructor(name: &str) -> Option<Self> {
        Some(match name {
            "memory" => ResourceKind::Memory,
            "instream" => ResourceKind::InStream,
            "outstream" => ResourceKind::OutStream,
            "channel" => ResourceKind::Channel,
            "register" => ResourceKind::Register,
            "iochannel" => ResourceKind::IoChannel,
            "ioregister" => ResourceKind::IoRegister,
            _ => return None,
        })
    }

    pub fn default_size(&self) -> u64 {
        match self {
            ResourceKind::Channel | ResourceKind::IoChannel => 16,
            _ => 1024,
        }
    }

    /// Only block memories are banked.
    pub fn is_banked(&self) -> bool {
        matches!(self, ResourceKind::Memory)
    }

    /// Kinds that use the ready/busy DMA handshake.
    pub fn is_bus(&self) -> bool {
        matches!(
            self,
            ResourceKind::Memory | ResourceKind::InStream | ResourceKind::OutStream
        )
    }

    pub fn is_queue(&self) -> bool {
        matches!(self, ResourceKind::Channel | ResourceKind::IoChannel)
    }

    pub fn is_reg(&self) -> bool {
        matches!(self, ResourceKind::Register | ResourceKind::IoRegister)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved resource: geometry constants plus everything derived
/// from them. Never mutated after [`Resource::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub idx: u64,
    /// Word width in bits.
    pub datawidth: u64,
    /// Capacity in words.
    pub size: u64,
    /// Bank count, memories only.
    pub length: Option<u64>,
    pub loglength: u64,
    /// Scatter/gather addressing across banks, memories only.
    pub scattergather: bool,
    pub addrwidth: u64,
    pub addroffset: u64,
    /// External bus width: gcd of the required width and the platform max.
    pub ext_datawidth: u64,
    pub numranks: Option<u64>,
    pub lognumranks: u64,
    pub numpages: Option<u64>,
    pub lognumpages: u64,
}

impl Resource {
    /// Validate the declared geometry and derive the dependent fields.
    pub fn resolve(
        kind: ResourceKind,
        idx: i64,
        datawidth: Option<i64>,
        size: Option<i64>,
        length: Option<i64>,
        scattergather: Option<i64>,
    ) -> CoramResult<Self> {
        if !kind.is_banked() && (length.is_some() || scattergather.is_some()) {
            return Err(Error::unsupported(format!(
                "`length`/`scattergather` are only accepted by memory resources, not {kind}",
            )));
        }

        let idx = u64::try_from(idx)
            .map_err(|_| Error::geometry(format!("negative resource id {idx}")))?;
        let datawidth = geometry_arg("datawidth", datawidth.unwrap_or(32))?;
        let size = geometry_arg("size", size.unwrap_or(kind.default_size() as i64))?;
        let length = if kind.is_banked() {
            Some(geometry_arg("length", length.unwrap_or(1))?)
        } else {
            None
        };
        let scattergather = scattergather.map(|v| v > 0).unwrap_or(false);

        if datawidth % 8 != 0 || !(datawidth / 8).is_power_of_two() {
            return Err(Error::geometry(format!(
                "data width must be a multiple of 8 with a power-of-two byte \
                 count, got {datawidth}",
            )));
        }

        let loglength = length.map(clog2).unwrap_or(0);
        let addrwidth = clog2(size);
        let addroffset = clog2(datawidth / 8);

        // A scatter/gather memory moves one word per bank per beat, so its
        // required bus width is the whole rank; everything else moves plain
        // words.
        let req_ext_datawidth = match length {
            Some(l) if scattergather => datawidth * l,
            _ => datawidth,
        };
        let ext_datawidth = gcd(req_ext_datawidth, EXT_MAX_DATAWIDTH);

        let numranks = length.map(|_| req_ext_datawidth.div_ceil(ext_datawidth));
        let lognumranks = numranks.map(clog2).unwrap_or(0);
        let numpages =
            length.map(|l| if scattergather { 1 } else { l });
        let lognumpages = numpages.map(clog2).unwrap_or(0);

        Ok(Resource {
            kind,
            idx,
            datawidth,
            size,
            length,
            loglength,
            scattergather,
            addrwidth,
            addroffset,
            ext_datawidth,
            numranks,
            lognumranks,
            numpages,
            lognumpages,
        })
    }

    /// Canonical signal prefix, e.g. `memory_0`. Identical kind+idx pairs
    /// share one prefix and therefore one port group.
    pub fn prefix(&self) -> Id {
        Id::new(format!("{}_{}", self.kind, self.idx))
    }

    /// A control or data line of this resource, e.g. `memory_0_ready`.
    pub fn signal(&self, suffix: &str) -> Id {
        self.prefix().with_suffix(suffix)
    }

    /// Largest legal word count for one transaction.
    pub fn capacity(&self) -> u64 {
        match self.length {
            Some(l) => self.size * l,
            None => self.size,
        }
    }
}

fn geometry_arg(name: &str, value: i64) -> CoramResult<u64> {
    if value <= 0 {
        return Err(Error::geometry(format!(
            "`{name}` must be a positive constant, got {value}",
        )));
    }
    Ok(value as u64)
}

/// All resources a thread has declared, keyed by signal prefix in first
/// declaration order, with the variable names that alias each of them.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    by_prefix: LinkedHashMap<Id, Resource>,
    aliases: HashMap<Id, Vec<Id>>,
    vars: HashMap<Id, Id>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `var` to a resource. Re-declaring the same kind+idx is
    /// aliasing and must agree on geometry; the first declaration wins the
    /// port group.
    pub fn register(&mut self, var: Id, resource: Resource) -> CoramResult<()> {
        let prefix = resource.prefix();
        match self.by_prefix.get(&prefix) {
            Some(existing) if *existing != resource => {
                return Err(Error::geometry(format!(
                    "resource {prefix} re-declared with conflicting geometry",
                )));
            }
            Some(_) => {}
            None => {
                self.by_prefix.insert(prefix, resource);
            }
        }
        self.aliases.entry(prefix).or_default().push(var);
        self.vars.insert(var, prefix);
        Ok(())
    }

    /// The resource a variable is bound to, if any.
    pub fn lookup(&self, var: Id) -> Option<&Resource> {
        self.vars.get(&var).and_then(|p| self.by_prefix.get(p))
    }

    /// The resource owning a signal prefix like `memory_0`, if any.
    pub fn by_prefix(&self, prefix: Id) -> Option<&Resource> {
        self.by_prefix.get(&prefix)
    }

    pub fn is_resource_var(&self, var: Id) -> bool {
        self.vars.contains_key(&var)
    }

    /// Descriptors in first declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.by_prefix.values()
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.iter().filter(move |r| r.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.by_prefix.is_empty()
    }

    /// Log the resolved geometry of every descriptor.
    pub fn log_summary(&self, thread: &str) {
        for res in self.iter() {
            let aliases = self
                .aliases
                .get(&res.prefix())
                .map(|v| {
                    v.iter()
                        .map(Id::as_str)
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default();
            log::info!(
                "{}: {} datawidth:{} addrwidth:{} size:{} length:{:?} sg:{} alias: {}",
                thread,
                res.prefix(),
                res.datawidth,
                res.addrwidth,
                res.size,
                res.length,
                res.scattergather,
                aliases
            );
        }
    }
}
