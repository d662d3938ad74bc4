//! The synthetic serial pipeline for `run job1 job2 ...`.

use std::sync::Arc;

use crate::model::{Job, Pipeline, PipelineJob};

impl Pipeline {
    /// Wrap an ordered list of jobs into an anonymous pipeline in which each
    /// job depends on the one before it, so the scheduler executes them
    /// strictly serially with the same machinery as a declared pipeline.
    pub fn ad_hoc(jobs: Vec<Arc<Job>>) -> Self {
        let pipeline_jobs = jobs
            .into_iter()
            .enumerate()
            .map(|(index, job)| {
                let dependencies = if index == 0 { vec![] } else { vec![index - 1] };
                PipelineJob::new(job, dependencies)
            })
            .collect();
        Pipeline::new(String::new(), vec![], pipeline_jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn three_jobs() -> Vec<Arc<Job>> {
        let cfg = Config::from_yaml(
            r#"
specUri: github.com/lovethedrake/drakespec
specVersion: v0.2.0
jobs:
  one:
    primaryContainer:
      name: main
      image: alpine
  two:
    primaryContainer:
      name: main
      image: alpine
  three:
    primaryContainer:
      name: main
      image: alpine
"#,
        )
        .unwrap();
        cfg.jobs(&["one", "two", "three"]).unwrap()
    }

    #[test]
    fn ad_hoc_pipeline_is_anonymous_and_triggerless() {
        let pipeline = Pipeline::ad_hoc(three_jobs());
        assert_eq!(pipeline.name(), "");
        assert!(pipeline.triggers().is_empty());
    }

    #[test]
    fn each_job_depends_on_its_predecessor() {
        let pipeline = Pipeline::ad_hoc(three_jobs());
        let jobs = pipeline.jobs();
        assert_eq!(jobs.len(), 3);
        assert!(jobs[0].dependencies().is_empty());
        assert_eq!(jobs[1].dependencies(), &[0]);
        assert_eq!(jobs[2].dependencies(), &[1]);
        assert_eq!(jobs[0].job().name(), "one");
        assert_eq!(jobs[2].job().name(), "three");
    }

    #[test]
    fn empty_job_list_yields_empty_pipeline() {
        let pipeline = Pipeline::ad_hoc(vec![]);
        assert!(pipeline.jobs().is_empty());
    }
}
