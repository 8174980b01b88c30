use super::Error;
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

/// Retry policy of a scheduled job. Delays are fixed, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "retry")]
#[serde(rename_all = "snake_case")]
pub enum JobRetry {
    #[default]
    None,
    Immediate {
        retry_count: u16,
    },
    Fixed {
        retry_count: u16,
        retry_delay: u32,
    },
}

impl JobRetry {
    /// Delay before the next attempt, given how many retries were already made.
    /// `None` once the policy is exhausted.
    pub fn next_retry_in(self, retry: u16) -> Option<Duration> {
        match self {
            JobRetry::None => None,
            JobRetry::Immediate { retry_count } => (retry < retry_count).then_some(Duration::ZERO),
            JobRetry::Fixed {
                retry_count,
                retry_delay,
            } => (retry < retry_count).then(|| Duration::from_secs(retry_delay.into())),
        }
    }
}

impl FromStr for JobRetry {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(JobRetry::None);
        }
        let parts: Vec<&str> = s.split(['|', ',']).collect();
        let retry_count: u16 = parts[0]
            .trim()
            .parse()
            .map_err(|_| Error::InvalidParams("retry"))?;

        match parts.len() {
            1 | 2 => Ok(JobRetry::Immediate { retry_count }),
            3 => {
                let retry_delay: u32 = parts[2]
                    .trim()
                    .parse()
                    .map_err(|_| Error::InvalidParams("retry"))?;
                match parts[1].trim() {
                    "fixed" => Ok(JobRetry::Fixed {
                        retry_count,
                        retry_delay,
                    }),
                    _ => Err(Error::InvalidParams("retry")),
                }
            }
            _ => Err(Error::InvalidParams("retry")),
        }
    }
}

#[tokio::test]
async fn job_retry_from_str_err() -> anyhow::Result<()> {
    // arrange
    let s = "test";
    // act
    let job_retry: Result<JobRetry, _> = s.parse();

    // assert
    assert!(job_retry.is_err());
    Ok(())
}

#[tokio::test]
async fn job_retry_from_str_empty() -> anyhow::Result<()> {
    // arrange
    let s = "";
    // act
    let job_retry: JobRetry = s.parse()?;

    // assert
    assert_eq!(JobRetry::None, job_retry);
    Ok(())
}

#[tokio::test]
async fn job_retry_from_str_immediate() -> anyhow::Result<()> {
    // arrange
    let s = "3";
    // act
    let job_retry: JobRetry = s.parse()?;

    // assert
    assert_eq!(JobRetry::Immediate { retry_count: 3 }, job_retry);
    Ok(())
}

#[tokio::test]
async fn job_retry_from_str_fixed() -> anyhow::Result<()> {
    // arrange
    let s = "3|fixed|300";
    // act
    let job_retry: JobRetry = s.parse()?;

    // assert
    assert_eq!(
        JobRetry::Fixed {
            retry_count: 3,
            retry_delay: 300
        },
        job_retry
    );
    Ok(())
}

#[tokio::test]
async fn job_retry_from_str_rejects_backoff() -> anyhow::Result<()> {
    // arrange
    let s = "3|fibonacci|15";
    // act
    let job_retry: Result<JobRetry, _> = s.parse();

    // assert
    assert!(job_retry.is_err());
    Ok(())
}

#[tokio::test]
async fn job_retry_fixed_until_exhausted() -> anyhow::Result<()> {
    // arrange
    let retry = JobRetry::Fixed {
        retry_count: 3,
        retry_delay: 5,
    };

    // act & assert
    assert_eq!(Some(Duration::from_secs(5)), retry.next_retry_in(0));
    assert_eq!(Some(Duration::from_secs(5)), retry.next_retry_in(1));
    assert_eq!(Some(Duration::from_secs(5)), retry.next_retry_in(2));
    assert_eq!(None, retry.next_retry_in(3));
    Ok(())
}

#[tokio::test]
async fn job_retry_none_never_retries() -> anyhow::Result<()> {
    // arrange
    let retry = JobRetry::None;

    // act & assert
    assert_eq!(None, retry.next_retry_in(0));
    Ok(())
}
