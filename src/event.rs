//! Event object model written through the devices.
//!
//! An [`Event`] holds a collection of Monte Carlo particles linked to each
//! other through parent/daughter references, and calorimeter hits whose
//! energy contributions point back at particles. Those links form a graph
//! with forward references, shared targets and parent/daughter cycles,
//! which is what the relocation tables exist for.
//!
//! [`Event::write`] and [`Event::read`] are one traversal, kept symmetric:
//!
//! ```text
//! run:i32 number:i32 detector:str
//! n_particles:i32 { <pointed_at> pdg:i32 status:i32 vertex:[f64;3]
//!                   momentum:[f32;3] mass:f64 charge:f32
//!                   n_parents:i32 {ptr} n_daughters:i32 {ptr} }
//! n_hits:i32      { cell_id:i32 energy:f32 position:[f32;3]
//!                   n_contrib:i32 { ptr energy:f32 time:f32 pdg:i32 } }
//! ```
//!
//! Strings are an `i32` byte length followed by the bytes, padded to a
//! multiple of four.
use std::fmt;

use anyhow::{Context, Result, bail};

use crate::device::{ReadDevice, WriteDevice};
use crate::relocation::{ObjectId, Relocation};

/// Index of a particle within its event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticleRef(pub usize);

// Filled in by relocation; never survives a successful read.
const UNRESOLVED: ParticleRef = ParticleRef(usize::MAX);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct McParticle {
    pub pdg: i32,
    pub generator_status: i32,
    pub vertex: [f64; 3],
    pub momentum: [f32; 3],
    pub mass: f64,
    pub charge: f32,
    pub parents: Vec<ParticleRef>,
    pub daughters: Vec<ParticleRef>,
}

impl McParticle {
    /// Energy from momentum and mass.
    pub fn energy(&self) -> f64 {
        let p2: f64 = self.momentum.iter().map(|p| f64::from(*p) * f64::from(*p)).sum();
        (p2 + self.mass * self.mass).sqrt()
    }
}

/// Share of a hit's energy deposited by one particle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct McContribution {
    pub particle: Option<ParticleRef>,
    pub energy: f32,
    pub time: f32,
    pub pdg: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalorimeterHit {
    pub cell_id: i32,
    pub energy: f32,
    pub position: [f32; 3],
    pub contributions: Vec<McContribution>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    pub run: i32,
    pub number: i32,
    pub detector: String,
    pub particles: Vec<McParticle>,
    pub hits: Vec<CalorimeterHit>,
}

/// Pointer field awaiting relocation while an event is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Parent { particle: usize, index: usize },
    Daughter { particle: usize, index: usize },
    Contribution { hit: usize, index: usize },
}

impl Event {
    /// Serialize the event and relocate its pointers.
    ///
    /// Particles are identified by address while the record is written;
    /// the event is borrowed for the whole call, so they cannot move.
    pub fn write(&self, device: &mut WriteDevice) -> Result<Relocation> {
        device.data(&self.run)?;
        device.data(&self.number)?;
        write_string(device, &self.detector)?;

        write_count(device, self.particles.len())?;
        for particle in &self.particles {
            device.pointed_at(ObjectId::of(particle))?;
            device.data(&particle.pdg)?;
            device.data(&particle.generator_status)?;
            device.data(&particle.vertex)?;
            device.data(&particle.momentum)?;
            device.data(&particle.mass)?;
            device.data(&particle.charge)?;
            for links in [&particle.parents, &particle.daughters] {
                write_count(device, links.len())?;
                for link in links {
                    device.pointer_to(Some(self.particle_id(*link)?))?;
                }
            }
        }

        write_count(device, self.hits.len())?;
        for (i, hit) in self.hits.iter().enumerate() {
            device.data(&hit.cell_id)?;
            device.data(&hit.energy)?;
            device.data(&hit.position)?;
            write_count(device, hit.contributions.len())?;
            for contribution in &hit.contributions {
                let target = contribution
                    .particle
                    .map(|p| self.particle_id(p))
                    .transpose()
                    .with_context(|| format!("hit {i}"))?;
                device.pointer_to(target)?;
                device.data(&contribution.energy)?;
                device.data(&contribution.time)?;
                device.data(&contribution.pdg)?;
            }
        }

        Ok(device.pointer_relocation()?)
    }

    /// Rebuild an event from `device` and relocate its pointers.
    pub fn read(device: &mut ReadDevice<'_, Slot, usize>) -> Result<(Self, Relocation)> {
        let run = device.value::<i32>()?;
        let number = device.value::<i32>()?;
        let detector = read_string(device).context("detector name")?;

        let n_particles = read_count(device).context("particle count")?;
        let mut particles = Vec::with_capacity(n_particles);
        for p in 0..n_particles {
            device.pointed_at(p);
            let mut particle = McParticle {
                pdg: device.value()?,
                generator_status: device.value()?,
                vertex: device.value()?,
                momentum: device.value()?,
                mass: device.value()?,
                charge: device.value()?,
                ..McParticle::default()
            };
            let n_parents = read_count(device).with_context(|| format!("particle {p} parents"))?;
            for index in 0..n_parents {
                if device.pointer_to(Slot::Parent { particle: p, index })?.is_none() {
                    bail!("particle {p} has a null parent at {index}");
                }
                particle.parents.push(UNRESOLVED);
            }
            let n_daughters =
                read_count(device).with_context(|| format!("particle {p} daughters"))?;
            for index in 0..n_daughters {
                if device.pointer_to(Slot::Daughter { particle: p, index })?.is_none() {
                    bail!("particle {p} has a null daughter at {index}");
                }
                particle.daughters.push(UNRESOLVED);
            }
            particles.push(particle);
        }

        let n_hits = read_count(device).context("hit count")?;
        let mut hits = Vec::with_capacity(n_hits);
        for h in 0..n_hits {
            let mut hit = CalorimeterHit {
                cell_id: device.value()?,
                energy: device.value()?,
                position: device.value()?,
                contributions: Vec::new(),
            };
            let n_contrib = read_count(device).with_context(|| format!("hit {h} contributions"))?;
            for index in 0..n_contrib {
                let token = device.pointer_to(Slot::Contribution { hit: h, index })?;
                hit.contributions.push(McContribution {
                    particle: token.map(|_| UNRESOLVED),
                    energy: device.value()?,
                    time: device.value()?,
                    pdg: device.value()?,
                });
            }
            hits.push(hit);
        }

        let relocation = device.pointer_relocation(|slot, target| {
            let target = ParticleRef(target);
            match slot {
                Slot::Parent { particle, index } => particles[particle].parents[index] = target,
                Slot::Daughter { particle, index } => particles[particle].daughters[index] = target,
                Slot::Contribution { hit, index } => {
                    hits[hit].contributions[index].particle = Some(target)
                }
            }
        })?;

        Ok((Self { run, number, detector, particles, hits }, relocation))
    }

    /// Build the event produced by the `simjob` generator.
    ///
    /// Particles form a one-body decay chain, each the daughter of the one
    /// before it. Every hit gets a single contribution from a pseudo-random
    /// particle; the sequence depends only on `run` and `number`.
    pub fn simulated(run: i32, number: i32, n_particles: usize, n_hits: usize) -> Self {
        let mut particles: Vec<McParticle> = (0..n_particles)
            .map(|j| McParticle {
                pdg: 101 + j as i32 * 100,
                generator_status: if j + 1 == n_particles { 1 } else { 2 },
                vertex: [j as f64 * 0.1, 0.0, 0.0],
                momentum: [2. / 1024., 4. / 1024., 8. / 1024.],
                mass: 0.139_57,
                charge: if j % 2 == 0 { 1.0 } else { -1.0 },
                parents: Vec::new(),
                daughters: Vec::new(),
            })
            .collect();
        for j in 1..n_particles {
            particles[j].parents.push(ParticleRef(j - 1));
            particles[j - 1].daughters.push(ParticleRef(j));
        }

        let mut rng = SplitMix64::new(((run as u64) << 32) | number as u32 as u64);
        let hits = (0..n_hits)
            .map(|j| {
                let contributions = if n_particles == 0 {
                    Vec::new()
                } else {
                    let index = ((n_particles as f64 * rng.unit()) as usize).min(n_particles - 1);
                    vec![McContribution {
                        particle: Some(ParticleRef(index)),
                        energy: 0.314_159,
                        time: 0.1155,
                        pdg: 121_212,
                    }]
                };
                CalorimeterHit {
                    cell_id: j as i32,
                    energy: (3.1415 * rng.unit()) as f32,
                    position: [
                        (1.1 * rng.unit()) as f32,
                        (2.2 * rng.unit()) as f32,
                        (3.3 * rng.unit()) as f32,
                    ],
                    contributions,
                }
            })
            .collect();

        Self { run, number, detector: "D09TileHcal".into(), particles, hits }
    }

    fn particle_id(&self, link: ParticleRef) -> Result<ObjectId> {
        match self.particles.get(link.0) {
            Some(particle) => Ok(ObjectId::of(particle)),
            None => bail!(
                "particle reference {} outside event with {} particles",
                link.0,
                self.particles.len()
            ),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "event {} run {} detector {}", self.number, self.run, self.detector)?;
        writeln!(f, "  {} MC particles", self.particles.len())?;
        for (i, p) in self.particles.iter().enumerate() {
            writeln!(
                f,
                "  [{i:>3}] pdg={:>6} status={} E={:.4} q={:+.0} parents=[{}] daughters=[{}]",
                p.pdg,
                p.generator_status,
                p.energy(),
                p.charge,
                join_refs(&p.parents),
                join_refs(&p.daughters)
            )?;
        }
        writeln!(f, "  {} calorimeter hits", self.hits.len())?;
        for hit in &self.hits {
            let particles: Vec<String> = hit
                .contributions
                .iter()
                .map(|c| c.particle.map_or_else(|| "-".to_string(), |p| p.0.to_string()))
                .collect();
            writeln!(
                f,
                "  cell {:>4} E={:.4} pos=({:.3},{:.3},{:.3}) mc=[{}]",
                hit.cell_id,
                hit.energy,
                hit.position[0],
                hit.position[1],
                hit.position[2],
                particles.join(",")
            )?;
        }
        Ok(())
    }
}

fn join_refs(links: &[ParticleRef]) -> String {
    links.iter().map(|l| l.0.to_string()).collect::<Vec<_>>().join(",")
}

fn write_count(device: &mut WriteDevice, count: usize) -> Result<()> {
    let count = i32::try_from(count).context("collection too large for an i32 count")?;
    device.data(&count)?;
    Ok(())
}

// A count can never exceed the bytes left, which bounds allocations on
// corrupt input.
fn read_count(device: &mut ReadDevice<'_, Slot, usize>) -> Result<usize> {
    let count = device.value::<i32>()?;
    if count < 0 {
        bail!("negative count {count}");
    }
    let count = count as usize;
    if count > device.remaining() {
        bail!("count {count} exceeds the {} bytes left in the record", device.remaining());
    }
    Ok(count)
}

fn write_string(device: &mut WriteDevice, s: &str) -> Result<()> {
    write_count(device, s.len())?;
    device.data_slice(s.as_bytes())?;
    let padding = [0u8; 3];
    device.data_slice(&padding[..(4 - s.len() % 4) % 4])?;
    Ok(())
}

fn read_string(device: &mut ReadDevice<'_, Slot, usize>) -> Result<String> {
    let len = read_count(device)?;
    let mut bytes = vec![0u8; len + (4 - len % 4) % 4];
    device.data_slice(&mut bytes)?;
    bytes.truncate(len);
    Ok(String::from_utf8(bytes)?)
}

// Deterministic generator so simulated events are reproducible.
struct SplitMix64(u64);

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in `[0, 1)`.
    fn unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}
