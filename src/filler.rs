//! Placeholder content for form fields the user left empty.

use rand::Rng;

const TOPICS: &[&str] = &[
    "Leadership fundamentals for first-time managers",
    "Delivering excellent customer service",
    "Communication and collaboration across teams",
    "Time management and personal productivity",
    "Handling conflict at work",
    "Consultative selling techniques",
    "Structured problem solving",
    "Inclusive workplace practices",
    "Project management essentials",
    "Keeping employees motivated",
];

const AUDIENCES: &[&str] = &[
    "new hires",
    "middle managers",
    "senior staff",
    "the sales team",
    "customer support agents",
    "cross-functional project teams",
    "remote employees",
    "department heads",
];

const FORMATS: &[&str] = &[
    "a one-hour workshop",
    "a two-hour session",
    "a half-day training",
    "a full-day seminar",
    "a 90-minute interactive session",
];

const OBJECTIVES: &[&str] = &[
    "sharpening communication and building stronger working relationships",
    "building confidence in everyday problem solving and decisions",
    "growing leadership and team management skills",
    "getting more done through better prioritization",
    "strengthening customer relationships and service quality",
    "resolving disagreements before they escalate",
    "improving how we engage customers during a sale",
    "raising awareness of inclusive habits",
];

const TONES: &[&str] = &[
    "Professional but engaging",
    "Casual and interactive",
    "Inspiring and upbeat",
    "Practical and straightforward",
    "Collaborative and discussion-driven",
];

const BACKGROUNDS: &[&str] = &[
    "corporate trainer with five years in professional development",
    "learning and development specialist who started out in HR",
    "team lead who moved into training and facilitation",
    "organizational development consultant",
    "former operations manager now teaching leadership",
    "training coordinator focused on adult learning",
    "freelance facilitator who works across industries",
    "in-house trainer at a large enterprise",
];

const INDUSTRIES: &[&str] = &[
    "software and technology",
    "healthcare",
    "retail",
    "manufacturing",
    "banking and financial services",
    "education and non-profits",
    "professional services",
    "hospitality",
];

const STYLES: &[&str] = &[
    "story-driven sessions that connect ideas to real situations",
    "hands-on activities and small-group discussion",
    "practical exercises grounded in a simple framework",
    "case studies and role play",
    "experiential learning with immediate practice",
    "workshops that build on what participants already know",
    "short talks broken up by breakout sessions",
    "problem-based learning around real workplace challenges",
];

const HABITS: &[&str] = &[
    "I work hard to make the room feel safe for sharing",
    "I always send people home with follow-up resources",
    "I adjust on the fly to the energy of the group",
    "I lean on examples from my own career",
    "I use humor to make hard concepts approachable",
    "I get participants teaching each other",
    "I make sure every session ends with something to try tomorrow",
];

fn pick<R: Rng + ?Sized>(rng: &mut R, options: &[&'static str]) -> &'static str {
    options[rng.gen_range(0..options.len())]
}

/// A plausible training-session description.
pub fn training_details<R: Rng + ?Sized>(rng: &mut R) -> String {
    let topic = pick(rng, TOPICS);
    let audience = pick(rng, AUDIENCES);
    let format = pick(rng, FORMATS);
    let objective = pick(rng, OBJECTIVES);
    let tone = pick(rng, TONES);
    format!("{topic} for {audience}, {format} focused on {objective}. {tone} tone.")
}

/// A plausible first-person trainer introduction.
pub fn personal_statement<R: Rng + ?Sized>(rng: &mut R) -> String {
    let background = pick(rng, BACKGROUNDS);
    let industry = pick(rng, INDUSTRIES);
    let style = pick(rng, STYLES);
    let habit = pick(rng, HABITS);
    format!("I'm a {background} working mostly in {industry}. I prefer {style}. {habit}.")
}
