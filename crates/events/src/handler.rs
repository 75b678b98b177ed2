use ecf_core::Aggregate;

/// Decide and evolve in one step, without persistence.
///
/// Calls `handle` and, when it succeeds, applies every emitted event to the
/// aggregate in place. Domain tests use this to drive an aggregate through its
/// lifecycle; the infrastructure dispatcher does the same with an append in
/// between.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: Aggregate,
{
    let events = aggregate.handle(command)?;
    for ev in &events {
        aggregate.apply(ev);
    }
    Ok(events)
}
