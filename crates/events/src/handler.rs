/// Execute an aggregate command in memory: decide, then apply the decided
/// events to the same instance.
///
/// No persistence and no publication; the HTTP path goes through
/// `CommandDispatcher::dispatch` instead. Used by aggregate unit tests and to
/// fold a freshly loaded stream forward.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: verdant_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
