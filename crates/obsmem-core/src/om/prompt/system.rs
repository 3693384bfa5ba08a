const OBSERVER_EXTRACTION_INSTRUCTIONS: &str = r"SEPARATE STATEMENTS FROM QUESTIONS

When the user states something about themselves or their work, record it as a fact.
When the user asks for something, record it as a request.
Facts the user states are authoritative and must survive future compression.

TRACK CHANGES OF STATE:
When new information replaces older information, say so explicitly and keep only the current state.

ANCHOR IN TIME:
Turn relative references (yesterday, next week) into estimated dates.
Keep the time something was said apart from the time it refers to.

KEEP THE DETAILS THAT MATTER:
- Names, handles and identifiers
- Numbers, quantities and units
- Dates, durations and ordering
- Places and distinguishing attributes
- Preferences and constraints
- Tool results, metrics and relevant code
- Wording the user chose deliberately";

const OBSERVER_OUTPUT_FORMAT: &str = r#"Mark every observation with a priority:
- 🔴 High: facts the user stated, preferences, goals, critical context
- 🟡 Medium: project details, learned information, tool results
- 🟢 Low: minor or uncertain details

Group observations under a date header and prefix each with a 24-hour time.

<observations>
Date: Mar 1, 2026
* 🔴 (14:30) User prefers short answers
* 🟡 (14:31) Migrating the billing service to Postgres
</observations>

<current-task>
Primary: what the assistant is working on right now
Secondary: pending work, marked "waiting for user" when blocked
</current-task>

<suggested-continuation>
A hint for the assistant's next message.
</suggested-continuation>

Recurring facts that belong together go in an optional patterns block:

<patterns>
<pattern name="tooling">
* prefers ripgrep over grep
</pattern>
</patterns>"#;

const OBSERVER_GUIDELINES: &str = r"- Be specific enough to act on later.
- Write densely and never repeat an earlier observation.
- Record tool calls together with their outcome and purpose.
- Keep file and line references when code is involved.
- Only add pattern entries that are not already listed.";

#[must_use]
pub fn build_observer_system_prompt() -> String {
    format!(
        r"You maintain the long-term memory of an AI assistant. The observations you write are all the assistant will know about earlier parts of this conversation.

Extract observations that help the assistant remember:

{OBSERVER_EXTRACTION_INSTRUCTIONS}

=== OUTPUT FORMAT ===

Structure your answer with XML tags:

{OBSERVER_OUTPUT_FORMAT}

=== GUIDELINES ===

{OBSERVER_GUIDELINES}

Do not add thread identifiers or <thread> tags; attribution is handled for you.

When the user asks a new question or assigns a new task, make it the priority in <current-task>, and use <suggested-continuation> to say whether the assistant should wait for the user before continuing."
    )
}

#[must_use]
pub fn build_multi_thread_observer_system_prompt() -> String {
    format!(
        r#"You maintain the long-term memory of an AI assistant. The observations you write are all the assistant will know about earlier conversations with this user.

Extract observations that help the assistant remember:

{OBSERVER_EXTRACTION_INSTRUCTIONS}

=== MULTIPLE THREADS ===

The input contains several conversation threads, each wrapped in a <thread id="..."> tag.
Handle every thread on its own and answer for each thread id you were given.

=== OUTPUT FORMAT ===

Nest each thread's observations, current task, continuation hint and patterns in a
<thread id="..."> block inside <observations>:

<observations>
<thread id="thread-1">
Date: Mar 1, 2026
* 🔴 (14:30) User prefers short answers

<current-task>
Migrating the billing service
</current-task>

<suggested-continuation>
Ask which schema to migrate first
</suggested-continuation>
</thread>
</observations>

Per-observation priorities and date headers follow these rules:

{OBSERVER_OUTPUT_FORMAT}

=== GUIDELINES ===

{OBSERVER_GUIDELINES}"#
    )
}

#[must_use]
pub fn build_reflector_system_prompt() -> String {
    format!(
        r"You maintain the long-term memory of an AI assistant. Your reflection replaces every observation collected so far and becomes the assistant's whole memory.

The observations were written under these instructions:

<observer-instructions>
{OBSERVER_EXTRACTION_INSTRUCTIONS}

{OBSERVER_OUTPUT_FORMAT}
</observer-instructions>

Your job is to reorganize and condense them, connect related entries and draw conclusions.
Anything you leave out is forgotten.

While condensing:
- Keep dates and the order of events.
- Merge related entries when that makes them easier to find.
- Condense older observations more than recent ones.
- Remove redundancy without losing facts.
- Treat statements the user made as authoritative; a later question does not cancel them.

When observations are grouped in <thread> blocks, keep the attribution for thread-specific
and pending work, and merge stable facts that hold across threads.

Answer with <observations>, optional <current-task>, optional <suggested-continuation>
and an optional <patterns> block holding the consolidated patterns."
    )
}
