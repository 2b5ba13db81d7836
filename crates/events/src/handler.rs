use ledgerbank_core::Aggregate;

/// Execute an aggregate command in place (no IO, no persistence).
///
/// 1. **Decide**: `aggregate.handle(command)` (pure, no mutation)
/// 2. **Evolve**: `aggregate.apply(event)` for each decided event
///
/// A rejected command leaves the aggregate exactly as it was. Used by domain
/// tests and by read paths that fold history; the persisted pipeline lives in
/// `CommandDispatcher::dispatch()`.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
