//! Demo data for fleet scheduling.
//!
//! Generates seeded instances over the months July to December (30 days
//! each) and provides [`DispatchBehaviour`], a greedy dispatcher that lets
//! the simulated engine answer them:
//! - every demand is served by an available vehicle of its month, leaving
//!   its node over one of the node's arcs;
//! - three successively cheaper models are reported per search.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::facts::{duplicate_identifier, Argument, Fact, FactError, Instance, HORIZON_CONSTANT};
use crate::scripted::{Behaviour, GroundState, PlannedModel, SolvePlan, Tail};

/// First and last month of a demo instance.
pub const FIRST_MONTH: i64 = 7;
pub const LAST_MONTH: i64 = 12;

const DAYS_PER_MONTH: i64 = 30;

/// Revenue per unit of served demand.
const UNIT_PRICE: i64 = 10;

/// Node all vehicles start from.
const DEPOT: i64 = 1;

/// Demo data sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoData {
    Small,
    Large,
}

impl std::str::FromStr for DemoData {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SMALL" => Ok(DemoData::Small),
            "LARGE" => Ok(DemoData::Large),
            _ => Err(()),
        }
    }
}

impl DemoData {
    /// ```
    /// use fleet_scheduling::demo_data::DemoData;
    ///
    /// assert_eq!(DemoData::Small.as_str(), "SMALL");
    /// assert_eq!("large".parse::<DemoData>(), Ok(DemoData::Large));
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            DemoData::Small => "SMALL",
            DemoData::Large => "LARGE",
        }
    }

    fn parameters(&self) -> DemoDataParameters {
        match self {
            DemoData::Small => DemoDataParameters {
                node_count: 6,
                extra_arc_count: 6,
                vehicle_count: 3,
                demands_per_month: 2,
                availability: 0.8,
                seed: 37,
            },
            DemoData::Large => DemoDataParameters {
                node_count: 20,
                extra_arc_count: 30,
                vehicle_count: 8,
                demands_per_month: 6,
                availability: 0.7,
                seed: 71,
            },
        }
    }

    /// Generates the instance; the same data set always yields the same facts.
    pub fn generate(&self) -> Result<Instance, FactError> {
        let parameters = self.parameters();
        let mut rng = StdRng::seed_from_u64(parameters.seed);
        let mut facts = Vec::new();

        for node in 1..=parameters.node_count {
            facts.push(Fact::new("node", vec![node.into()]));
        }

        // A ring guarantees every node one way out; extra arcs add choice.
        let mut arcs = BTreeSet::new();
        for node in 1..=parameters.node_count {
            arcs.insert((node, node % parameters.node_count + 1));
        }
        let mut attempts = 0;
        while arcs.len() < (parameters.node_count + parameters.extra_arc_count) as usize && attempts < 1000 {
            attempts += 1;
            let from = rng.gen_range(1..=parameters.node_count);
            let to = rng.gen_range(1..=parameters.node_count);
            if from != to {
                arcs.insert((from, to));
            }
        }
        for (from, to) in arcs {
            let cost: i64 = rng.gen_range(5..=40);
            facts.push(Fact::new("arc", vec![from.into(), to.into(), cost.into()]));
        }

        for month in FIRST_MONTH..=LAST_MONTH {
            let start = (month - FIRST_MONTH) * DAYS_PER_MONTH;
            facts.push(Fact::new(
                "month",
                vec![month.into(), start.into(), (start + DAYS_PER_MONTH).into()],
            ));
            for _ in 0..parameters.demands_per_month {
                let node = rng.gen_range(DEPOT + 1..=parameters.node_count);
                let quantity: i64 = rng.gen_range(1..=20);
                facts.push(Fact::new("demand", vec![node.into(), month.into(), quantity.into()]));
            }
        }

        for index in 1..=parameters.vehicle_count {
            let vehicle = Argument::symbol(format!("v{}", index));
            let capacity: i64 = rng.gen_range(20..=60);
            facts.push(Fact::new("vehicle", vec![vehicle.clone(), capacity.into()]));
            for month in FIRST_MONTH..=LAST_MONTH {
                // One vehicle per month is always on duty.
                let on_duty = (month - FIRST_MONTH) % parameters.vehicle_count + 1 == index;
                if on_duty || rng.gen_bool(parameters.availability) {
                    facts.push(Fact::new("available", vec![vehicle.clone(), month.into()]));
                }
            }
        }

        let mut instance = Instance::from_facts(facts)?;
        instance.set_constant(
            HORIZON_CONSTANT,
            Argument::Integer((LAST_MONTH - FIRST_MONTH + 1) * DAYS_PER_MONTH),
        );
        Ok(instance)
    }
}

struct DemoDataParameters {
    node_count: i64,
    extra_arc_count: i64,
    vehicle_count: i64,
    demands_per_month: usize,
    availability: f64,
    seed: u64,
}

/// List of available demo data sets.
pub fn list_demo_data() -> Vec<&'static str> {
    vec![DemoData::Small.as_str(), DemoData::Large.as_str()]
}

/// Argument positions holding node identifiers, per predicate.
const NODE_POSITIONS: [(&str, &[usize]); 3] = [("node", &[0]), ("arc", &[0, 1]), ("demand", &[0])];

/// Replicates the road network `copies` times for the same fleet.
///
/// Copy `k` marks its node identifiers with the `k`-th letter (`2` becomes
/// `b2`); months, vehicles and availabilities are shared. One copy returns
/// the instance unchanged.
pub fn duplicate(instance: &Instance, copies: u32) -> Result<Instance, FactError> {
    if copies <= 1 {
        return Ok(instance.clone());
    }
    let mut facts = Vec::new();
    for fact in instance.facts() {
        let positions = NODE_POSITIONS
            .iter()
            .find(|(name, _)| *name == fact.name())
            .map(|(_, positions)| *positions);
        let Some(positions) = positions else {
            facts.push(fact.clone());
            continue;
        };
        for index in 1..=copies {
            let arguments = fact
                .arguments()
                .iter()
                .enumerate()
                .map(|(i, argument)| {
                    if positions.contains(&i) {
                        duplicate_identifier(argument, index, copies).ok_or(FactError::Duplicates(copies))
                    } else {
                        Ok(argument.clone())
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            facts.push(Fact::new(fact.name(), arguments));
        }
    }

    let mut duplicated = Instance::from_facts(facts)?;
    for (name, value) in instance.constants() {
        duplicated.set_constant(name, value.clone());
    }
    Ok(duplicated)
}

/// Greedy dispatcher answering fleet instances in the simulated engine.
///
/// Reads the ground state: the months of the latest `inc` part (all months
/// when none is grounded), whether `req` or `cost` parts are grounded, and
/// the committed `occurred` externals, which reappear as `travel` facts.
#[derive(Debug, Clone)]
pub struct DispatchBehaviour {
    step_delay: Duration,
}

impl DispatchBehaviour {
    /// A dispatcher spending `step_delay` of search time per model.
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

impl Default for DispatchBehaviour {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

/// One served demand and the arcs it could leave its node by, dearest first.
struct Dispatch {
    vehicle: Argument,
    node: Argument,
    month: i64,
    quantity: i64,
    options: Vec<(i64, Argument)>,
}

impl Behaviour for DispatchBehaviour {
    fn plan(&mut self, state: &GroundState) -> SolvePlan {
        let months: BTreeSet<i64> = state.predicate("month").filter_map(|m| m.integer(0)).collect();
        let targets: BTreeSet<i64> = match state.latest("inc") {
            Some(part) => part
                .arguments
                .first()
                .and_then(|period| usize::try_from(*period).ok())
                .and_then(|period| months.iter().nth(period).copied())
                .into_iter()
                .collect(),
            None => months,
        };

        let mut arcs: BTreeMap<&Argument, Vec<(i64, Argument)>> = BTreeMap::new();
        for arc in state.predicate("arc") {
            if let ([from, to, _], Some(cost)) = (arc.arguments(), arc.integer(2)) {
                arcs.entry(from).or_default().push((cost, to.clone()));
            }
        }
        for options in arcs.values_mut() {
            options.sort_by(|a, b| b.cmp(a));
        }

        let mut available: BTreeMap<i64, Vec<&Argument>> = BTreeMap::new();
        for fact in state.predicate("available") {
            if let ([vehicle, _], Some(month)) = (fact.arguments(), fact.integer(1)) {
                available.entry(month).or_default().push(vehicle);
            }
        }

        let mut dispatches = Vec::new();
        let mut unserved = 0i64;
        let mut assigned: BTreeMap<i64, usize> = BTreeMap::new();
        for demand in state.predicate("demand") {
            let (node, month, quantity) = match (demand.arguments().first(), demand.integer(1), demand.integer(2)) {
                (Some(node), Some(month), Some(quantity)) => (node, month, quantity),
                _ => continue,
            };
            if !targets.contains(&month) {
                continue;
            }
            let vehicles = available.get(&month).map(Vec::as_slice).unwrap_or_default();
            let options = arcs.get(node).cloned().unwrap_or_default();
            if vehicles.is_empty() || options.is_empty() {
                unserved += 1;
                continue;
            }
            let turn = assigned.entry(month).or_insert(0);
            let vehicle = vehicles[*turn % vehicles.len()].clone();
            *turn += 1;
            dispatches.push(Dispatch {
                vehicle,
                node: node.clone(),
                month,
                quantity,
                options,
            });
        }

        if unserved > 0 && state.is_grounded("req") {
            return SolvePlan::unsatisfiable();
        }

        let committed: Vec<Fact> = state
            .true_externals()
            .into_iter()
            .filter(|fact| fact.name() == "occurred")
            .map(|fact| fact.renamed("travel"))
            .collect();
        let with_cost = state.is_grounded("cost");
        let revenue = (dispatches.iter().map(|d| d.quantity).sum::<i64>() * UNIT_PRICE) as f64;

        let models = (0..3)
            .map(|step| {
                let mut facts = committed.clone();
                let mut expense = 0i64;
                for dispatch in &dispatches {
                    let last = dispatch.options.len() - 1;
                    let index = match step {
                        0 => 0,
                        1 => last / 2,
                        _ => last,
                    };
                    let (cost, to) = &dispatch.options[index];
                    expense += cost;
                    facts.push(Fact::new(
                        "travel",
                        vec![
                            dispatch.vehicle.clone(),
                            dispatch.node.clone(),
                            to.clone(),
                            dispatch.month.into(),
                        ],
                    ));
                }
                let mut cost = vec![unserved];
                if with_cost {
                    cost.push(expense);
                }
                PlannedModel::new(facts)
                    .with_delay(self.step_delay)
                    .with_cost(cost)
                    .with_value("revenue", revenue)
                    .with_value("expense", expense as f64)
            })
            .collect();

        SolvePlan::new(models, Tail::Exhaust(self.step_delay))
    }
}
