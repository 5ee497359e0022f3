use crate::submission::SubmissionService;
use autoapply_core::{submission::SubmitError, Job};
use chrono::{DateTime, Duration, Utc};
use rand::{seq::SliceRandom, Rng};
use tracing::info;

const COMPANIES: &[&str] = &[
    "Google", "Meta", "Amazon", "Microsoft", "Apple", "Netflix", "Tesla", "Spotify", "Adobe",
    "Salesforce", "Oracle", "IBM", "Stripe", "Airbnb", "Uber", "Lyft", "Twitter", "LinkedIn",
    "Dropbox", "Slack", "Zoom", "Shopify", "Square", "PayPal",
];

const ROLES: &[&str] = &[
    "Software Engineer",
    "Senior Software Engineer",
    "Staff Engineer",
    "Frontend Developer",
    "Backend Developer",
    "Full Stack Developer",
    "DevOps Engineer",
    "Data Scientist",
    "ML Engineer",
    "Product Manager",
    "Engineering Manager",
    "Solutions Architect",
    "QA Engineer",
    "Security Engineer",
    "Platform Engineer",
    "Site Reliability Engineer",
    "Mobile Developer",
    "Cloud Engineer",
    "AI Research Scientist",
    "Technical Lead",
    "Principal Engineer",
    "Data Engineer",
];

const LOCATIONS: &[&str] = &[
    "Remote",
    "San Francisco, CA",
    "New York, NY",
    "Seattle, WA",
    "Austin, TX",
    "Boston, MA",
    "Los Angeles, CA",
    "Chicago, IL",
    "Denver, CO",
    "Atlanta, GA",
    "Remote (US)",
    "Remote (Global)",
    "London, UK",
    "Toronto, Canada",
    "Berlin, Germany",
    "Singapore",
];

// Full-time is weighted three to one.
const JOB_TYPES: &[&str] = &["Full-time", "Full-time", "Full-time", "Contract", "Part-time"];

const SKILL_SETS: &[&[&str]] = &[
    &["JavaScript", "React", "Node.js", "MongoDB"],
    &["Python", "Django", "PostgreSQL", "AWS"],
    &["Java", "Spring Boot", "MySQL", "Kubernetes"],
    &["TypeScript", "Vue.js", "GraphQL", "Docker"],
    &["Go", "Microservices", "Redis", "gRPC"],
    &["Python", "TensorFlow", "PyTorch", "Pandas"],
    &["C++", "System Design", "Linux", "Performance"],
    &["React Native", "iOS", "Android", "Firebase"],
    &["Kubernetes", "Terraform", "CI/CD", "Jenkins"],
    &["AWS", "Azure", "GCP", "Cloud Architecture"],
];

/// Generates `count` listings; the first is the newest.
pub fn generate_jobs<R: Rng>(count: usize, now: DateTime<Utc>, rng: &mut R) -> Vec<Job> {
    (0..count)
        .map(|idx| {
            let company = pick(COMPANIES, rng);
            let role = pick(ROLES, rng);
            let location = pick(LOCATIONS, rng);
            let job_type = pick(JOB_TYPES, rng);
            let skills = SKILL_SETS.choose(rng).copied().unwrap_or(&[]);
            let low: u32 = rng.gen_range(80..230);
            let high = rng.gen_range(low + 10..=low + 80);
            Job {
                job_id: uuid::Uuid::new_v4().to_string(),
                title: role.to_string(),
                company: company.to_string(),
                location: location.to_string(),
                job_type: job_type.to_string(),
                salary: format!("${low}k - ${high}k"),
                description: format!(
                    "We are seeking a talented {role} to join our {company} team in {location}. \
                     You will work on cutting-edge projects, collaborate with world-class engineers, \
                     and have the opportunity to make a significant impact. This is a {} position \
                     with competitive compensation and benefits.",
                    job_type.to_lowercase()
                ),
                required_skills: skills.iter().map(|skill| skill.to_string()).collect(),
                visa_sponsorship: rng.gen_bool(0.6),
                created_at: now - Duration::seconds(idx as i64),
            }
        })
        .collect()
}

/// Clears applications and jobs, then loads a freshly generated catalog.
pub fn reseed(service: &SubmissionService, count: usize) -> Result<usize, SubmitError> {
    let jobs = generate_jobs(count, Utc::now(), &mut rand::thread_rng());
    let created = service.replace_catalog(&jobs)?;
    info!(event = "catalog_seeded", jobs = created);
    Ok(created)
}

fn pick<R: Rng>(items: &[&'static str], rng: &mut R) -> &'static str {
    items.choose(rng).copied().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn generated_jobs_draw_from_tables() {
        let mut rng = StdRng::seed_from_u64(9);
        let now = Utc::now();
        let jobs = generate_jobs(50, now, &mut rng);
        assert_eq!(jobs.len(), 50);
        for job in &jobs {
            assert!(COMPANIES.contains(&job.company.as_str()));
            assert!(ROLES.contains(&job.title.as_str()));
            assert!(LOCATIONS.contains(&job.location.as_str()));
            assert_eq!(job.required_skills.len(), 4);
            assert!(job.salary.starts_with('$') && job.salary.ends_with('k'));
            assert!(job.description.contains(&job.company));
        }
        assert_eq!(jobs[0].created_at, now);
        assert!(jobs[1].created_at < jobs[0].created_at);
    }

    #[test]
    fn salary_ranges_are_never_inverted() {
        let mut rng = StdRng::seed_from_u64(4);
        for job in generate_jobs(500, Utc::now(), &mut rng) {
            let bounds: Vec<u32> = job
                .salary
                .split(" - ")
                .map(|part| {
                    part.trim_matches(|c| c == '$' || c == 'k')
                        .parse()
                        .expect("salary bound")
                })
                .collect();
            assert_eq!(bounds.len(), 2, "{}", job.salary);
            assert!(bounds[0] < bounds[1], "{}", job.salary);
            assert!(bounds[1] - bounds[0] <= 80, "{}", job.salary);
        }
    }

    #[test]
    fn job_ids_are_unique() {
        let mut rng = StdRng::seed_from_u64(1);
        let jobs = generate_jobs(200, Utc::now(), &mut rng);
        let mut ids: Vec<_> = jobs.iter().map(|job| job.job_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 200);
    }
}
